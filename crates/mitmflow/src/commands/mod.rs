pub mod main;
pub mod post;
pub mod pre;
