pub mod activity;
pub mod actor;
pub mod deal_code;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod related;
pub mod reports;
pub mod rules;
pub mod schema;
pub mod seed;
pub mod validation;

pub use actor::{Actor, ACTOR_HEADER};
pub use error::{CrmError, CrmResult, TransitionError, ValidationError};
pub use lifecycle::{
    archive_deal, create_deal, get_deal, get_stage_history, list_deals, restore_deal,
    transition_deal, update_deal, DealChanges, DealListQuery, NewDeal, TransitionRequest,
};
pub use schema::{build_schema, AppSchema};
