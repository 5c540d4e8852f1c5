use std::collections::BTreeMap;

use trigwatch_common::context::OpContext;
use trigwatch_common::types::{Trigger, TriggerType};
use trigwatch_source::SourceProvider;

use crate::error::{BindError, Result};

/// Window fetched for every target while binding.
pub const BIND_FETCH_WINDOW_SECS: i64 = 600;

const PLACEHOLDERS: [&str; 4] = ["trigger_id", "trigger_name", "tags", "targets"];

/// A trigger that passed binding, with the series names each target
/// resolved to, keyed `t1`, `t2`, ...
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTrigger {
    pub trigger: Trigger,
    pub time_series_names: BTreeMap<String, Vec<String>>,
}

/// Validates incoming trigger definitions.
pub struct TriggerBinder<'a> {
    provider: &'a SourceProvider,
    now: i64,
}

impl<'a> TriggerBinder<'a> {
    pub fn new(provider: &'a SourceProvider, now: i64) -> Self {
        Self { provider, now }
    }

    /// Structural validation, description template, trigger expression,
    /// then a fetch of every target over the last ten minutes, bounded by
    /// the deadline of `ctx`.
    ///
    /// # Errors
    ///
    /// The first failing step: [`BindError::InvalidRequest`],
    /// [`BindError::InvalidExpression`] or the fetch's
    /// [`BindError::Source`].
    pub async fn bind(&self, ctx: &OpContext, mut trigger: Trigger) -> Result<BoundTrigger> {
        trigger.name = trigger.name.trim().to_string();
        validate_structure(&trigger)?;
        render_description(&trigger)?;
        validate_expression(&trigger)?;

        let source = self.provider.get(trigger.is_remote)?;
        let mut time_series_names = BTreeMap::new();
        for (idx, target) in trigger.targets.iter().enumerate() {
            let fetched = source
                .fetch(ctx, self.now - BIND_FETCH_WINDOW_SECS, self.now, target)
                .await?;
            time_series_names.insert(format!("t{}", idx + 1), fetched.names());
        }
        Ok(BoundTrigger {
            trigger,
            time_series_names,
        })
    }
}

fn validate_structure(trigger: &Trigger) -> Result<()> {
    if trigger.name.is_empty() {
        return Err(BindError::InvalidRequest("trigger name is required".into()));
    }
    if trigger.targets.is_empty() {
        return Err(BindError::InvalidRequest("targets is required".into()));
    }
    if let Some(idx) = trigger.targets.iter().position(|t| t.trim().is_empty()) {
        return Err(BindError::InvalidRequest(format!(
            "target t{} is empty",
            idx + 1
        )));
    }
    if trigger.tags.is_empty() {
        return Err(BindError::InvalidRequest("tags is required".into()));
    }
    if trigger.tags.iter().any(|t| t.trim().is_empty()) {
        return Err(BindError::InvalidRequest("tags cannot be empty".into()));
    }
    Ok(())
}

/// Render the description template, or `None` when the trigger has none.
///
/// # Examples
///
/// ```
/// use trigwatch_common::types::Trigger;
/// use trigwatch_verify::render_description;
///
/// let mut trigger = Trigger::new("cpu", vec!["servers.*.cpu".into()]);
/// trigger.tags = vec!["prod".into(), "web".into()];
/// trigger.desc = Some("{{trigger_name}} on {{tags}}".into());
/// assert_eq!(render_description(&trigger).unwrap().as_deref(), Some("cpu on prod, web"));
///
/// trigger.desc = Some("{{value}}".into());
/// assert!(render_description(&trigger).is_err());
/// ```
pub fn render_description(trigger: &Trigger) -> Result<Option<String>> {
    let Some(template) = &trigger.desc else {
        return Ok(None);
    };
    let mut rest = template.as_str();
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            return Err(BindError::InvalidRequest(
                "description template has an unterminated '{{'".into(),
            ));
        };
        let name = after[..close].trim();
        if !PLACEHOLDERS.contains(&name) {
            return Err(BindError::InvalidRequest(format!(
                "description template uses unknown placeholder '{{{{{name}}}}}'"
            )));
        }
        rest = &after[close + 2..];
    }
    Ok(Some(
        template
            .replace("{{trigger_id}}", &trigger.id)
            .replace("{{trigger_name}}", &trigger.name)
            .replace("{{tags}}", &trigger.tags.join(", "))
            .replace("{{targets}}", &trigger.targets.join(", ")),
    ))
}

fn validate_expression(trigger: &Trigger) -> Result<()> {
    match trigger.trigger_type {
        TriggerType::Rising | TriggerType::Falling => {
            let (warn, error) = (trigger.warn_value, trigger.error_value);
            if warn.is_none() && error.is_none() {
                return Err(BindError::InvalidExpression(
                    "at least one of warn_value and error_value is required".into(),
                ));
            }
            if let (Some(w), Some(e)) = (warn, error) {
                let rising = trigger.trigger_type == TriggerType::Rising;
                if rising && w >= e {
                    return Err(BindError::InvalidExpression(
                        "warn_value must be less than error_value for a rising trigger".into(),
                    ));
                }
                if !rising && w <= e {
                    return Err(BindError::InvalidExpression(
                        "warn_value must be greater than error_value for a falling trigger".into(),
                    ));
                }
            }
            Ok(())
        }
        TriggerType::Expression => {
            let expression = trigger.expression.as_deref().unwrap_or_default().trim();
            if expression.is_empty() {
                return Err(BindError::InvalidExpression(
                    "expression is required for an expression trigger".into(),
                ));
            }
            check_expression_text(expression, trigger.targets.len())
        }
    }
}

/// Parentheses balance and `tN` references within `1..=targets`.
fn check_expression_text(expression: &str, targets: usize) -> Result<()> {
    let mut depth = 0i32;
    for c in expression.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(BindError::InvalidExpression("unbalanced ')'".into()));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(BindError::InvalidExpression("unclosed '('".into()));
    }
    let identifiers = expression
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty());
    for word in identifiers {
        let Some(digits) = word.strip_prefix('t') else {
            continue;
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let n: usize = digits.parse().unwrap_or(0);
        if n == 0 || n > targets {
            return Err(BindError::InvalidExpression(format!(
                "{word} does not name one of the {targets} target(s)"
            )));
        }
    }
    Ok(())
}
