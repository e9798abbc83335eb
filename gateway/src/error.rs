//! Gateway-side failure classes for the agent connection.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("连接失败: {0}")]
    Connect(String),

    #[error("读取失败: {0}")]
    Read(String),

    #[error("协议错误: {0}")]
    Protocol(String),
}
