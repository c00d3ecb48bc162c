// Order execution and position tracking module
pub mod executor;
pub mod gateway;
pub mod pair_locks;
pub mod position_manager;

pub use executor::{lock_positions, ExecutionAction, ExecutionDecision, Executor};
pub use gateway::{OrderFill, OrderGateway, OrderRequest, OrderSide, PaperGateway};
pub use pair_locks::PairLocks;
pub use position_manager::{
    check_entry, ExitReason, ExitTrigger, PortfolioSnapshot, Position, PositionManager, PositionStatus,
    MAX_HISTORY,
};
