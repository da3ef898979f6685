pub mod advanced_results;
pub mod auth;
pub mod checkout;
pub mod devices;
pub mod filter;
pub mod pagination;
pub mod users;

#[cfg(test)]
pub mod testing;
