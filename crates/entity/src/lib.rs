pub mod company;
pub mod contact;
pub mod deal;
pub mod deal_code_sequence;
pub mod deal_stage_history;
pub mod interaction;
pub mod related;
pub mod task;
