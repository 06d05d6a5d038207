pub mod fulfillment;
pub mod offer;
pub mod order_book;
pub mod price_function;
pub mod service;

pub use fulfillment::*;
pub use offer::*;
pub use order_book::*;
pub use price_function::*;
pub use service::*;
