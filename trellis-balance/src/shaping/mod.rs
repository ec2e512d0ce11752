pub mod warmup;

pub use warmup::WarmUpTrafficShaping;
