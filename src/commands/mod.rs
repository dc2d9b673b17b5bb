pub mod check_data;
pub mod columns;
pub mod extract;
pub mod train;
