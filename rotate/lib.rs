#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod catalog;
pub mod cayley;
pub mod config;
pub mod faer_ndarray;
pub mod isres;
pub mod seeding;
pub mod tournament;

#[path = "../indices/mod.rs"]
pub mod indices;

// Study store, reports and matrix IO
#[path = "../study/mod.rs"]
pub mod study;
