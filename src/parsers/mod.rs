pub mod gcov;
