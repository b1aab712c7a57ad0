pub mod price_model;
pub mod tick_math;
