//! Constant-product AMM math
//!
//! Pure integer pricing over pair reserves. Nothing in here touches the
//! chain; live reserves are always re-read by the callers.

pub mod price;
pub mod reserve;

pub use price::{get_amount_out, projected_new_reserve, TradeInput, DEFAULT_FEE_MULTIPLIER};
pub use reserve::{NativeSide, Reserve};
