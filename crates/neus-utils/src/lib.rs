pub mod collection;
pub mod data;
pub mod tensor;
pub mod var_store;
