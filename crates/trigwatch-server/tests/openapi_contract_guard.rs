mod common;

use anyhow::{anyhow, Result};
use common::{build_test_context, request_no_body};
use std::collections::{BTreeSet, HashSet};

#[tokio::test]
async fn openapi_paths_should_be_covered_by_test_matrix() -> Result<()> {
    let ctx = build_test_context().await?;
    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/openapi.json", None).await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let Some(paths) = body["paths"].as_object() else {
        return Err(anyhow!("openapi paths should be object"));
    };

    let mut exposed: BTreeSet<String> = BTreeSet::new();
    for (path, methods) in paths {
        let Some(methods) = methods.as_object() else {
            return Err(anyhow!("path methods should be object for {path}"));
        };
        for method in methods.keys() {
            let method = method.to_ascii_uppercase();
            exposed.insert(format!("{method} {path}"));
        }
    }

    let covered: HashSet<String> = [
        "GET /v1/health",
        "GET /v1/triggers",
        "PUT /v1/triggers",
        "PUT /v1/triggers/check",
        "GET /v1/triggers/search",
        "DELETE /v1/triggers/search/pager",
        "GET /v1/triggers/page",
        "GET /v1/triggers/{id}",
        "PUT /v1/triggers/{id}",
        "DELETE /v1/triggers/{id}",
    ]
    .into_iter()
    .map(|s| s.to_string())
    .collect();

    let missing: Vec<String> = exposed
        .iter()
        .filter(|route| !covered.contains(*route))
        .cloned()
        .collect();
    assert!(
        missing.is_empty(),
        "OpenAPI routes missing from test matrix: {missing:?}"
    );

    let undocumented: Vec<&String> = covered.iter().filter(|r| !exposed.contains(*r)).collect();
    assert!(
        undocumented.is_empty(),
        "routes without OpenAPI documentation: {undocumented:?}"
    );
    Ok(())
}

#[tokio::test]
async fn openapi_search_query_params_should_be_optional() -> Result<()> {
    let ctx = build_test_context().await?;
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/openapi.json", None).await;

    for path in ["/v1/triggers/search", "/v1/triggers/page"] {
        let Some(parameters) = body["paths"][path]["get"]["parameters"].as_array() else {
            return Err(anyhow!("GET {path} should expose parameters"));
        };
        for name in ["tags[0]", "text", "onlyProblems", "p", "size", "createPager", "pagerID"] {
            let param = parameters
                .iter()
                .find(|p| p["in"].as_str() == Some("query") && p["name"].as_str() == Some(name))
                .ok_or_else(|| anyhow!("{path} should document query param {name}"))?;
            let required = param
                .get("required")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            assert!(!required, "{path} query param {name} should be optional");
        }
    }
    Ok(())
}

#[tokio::test]
async fn openapi_schemas_should_describe_problem_trees() -> Result<()> {
    let ctx = build_test_context().await?;
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/openapi.json", None).await;

    let Some(schemas) = body["components"]["schemas"].as_object() else {
        return Err(anyhow!("openapi components.schemas should be object"));
    };
    for (schema, fields) in [
        ("TargetVerification", &["target", "syntax_ok", "tree"][..]),
        ("ProblemNode", &["kind", "argument", "position", "problems"][..]),
        ("SearchResponse", &["list", "page", "size", "total", "pager_id"][..]),
        ("Trigger", &["name", "targets", "tags", "is_remote"][..]),
    ] {
        let props = schemas
            .get(schema)
            .and_then(|s| s["properties"].as_object())
            .ok_or_else(|| anyhow!("{schema} schema should have properties"))?;
        for field in fields {
            assert!(props.contains_key(*field), "{schema} should contain field {field}");
        }
    }
    Ok(())
}
