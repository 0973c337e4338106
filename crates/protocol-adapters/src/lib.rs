//! Protocol adapters and the registry that resolves them by protocol id.

pub mod aave_v3;
pub mod curve;
pub mod registry;

pub use aave_v3::AaveV3Adapter;
pub use curve::CurveAdapter;
pub use registry::AdapterRegistry;
