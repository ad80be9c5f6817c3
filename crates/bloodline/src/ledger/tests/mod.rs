mod common;
mod monitor;
