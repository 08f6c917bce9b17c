pub mod comparator;
pub mod fetch;
pub mod scanner;
