pub mod bitmap;
pub mod brc20;
pub mod sns;
