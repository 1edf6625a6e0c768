pub mod adapter;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod providers;
pub mod timed;

pub use adapter::{BotMediaAdapter, BudgetSource};
pub use error::{BotError, Result};
pub use models::{FetchMode, ImageSource, OperationOptions};
pub use timed::{TimeoutBudget, TimedOperation};
