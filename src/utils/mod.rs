pub mod crypto;
pub mod path_utils;
