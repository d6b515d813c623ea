mod common;
mod scheduler_tests;
