pub mod range_quoter;
pub mod reconciler;
