pub mod service;
pub mod uniswap;
