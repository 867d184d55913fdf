pub mod db;
pub mod payments;

pub use db::DbAdapter;
pub use payments::StripePaymentAdapter;
