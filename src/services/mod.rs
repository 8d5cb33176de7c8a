pub mod dates;
pub mod html_signature;
pub mod processor;
pub mod renderer;
pub mod retry;
pub mod storage;
pub mod webhook;
