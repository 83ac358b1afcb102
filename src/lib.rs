pub mod config;
pub mod endpoint;
pub mod rpc;  // 로컬 레지스트리 + 루프백 전송
pub mod settings;
pub mod supervisor;
pub mod utils;
