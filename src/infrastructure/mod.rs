pub mod generic_repository;
pub mod sql_builder;
