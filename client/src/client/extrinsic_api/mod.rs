pub mod signed;
