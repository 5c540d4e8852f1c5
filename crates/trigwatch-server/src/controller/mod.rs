//! Request flows behind the HTTP handlers: binding, verification, locking,
//! persistence and indexing of triggers, plus paginated search.

mod search;
mod triggers;

pub use search::{delete_pager, search_triggers, SearchPage, SearchRequest};
pub use triggers::{
    check_trigger, create_trigger, delete_trigger, get_trigger, list_triggers, update_trigger,
    SavedTrigger,
};
