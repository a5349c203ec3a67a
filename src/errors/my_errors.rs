use thiserror::Error;

pub type RetErr = std::boxed::Box<dyn std::error::Error + std::marker::Send + std::marker::Sync>;
pub type RetResult<T> = std::result::Result<T, RetErr>;

#[derive(Error, Debug)]
pub enum MyError {
    /// 时钟往回拨了，携带回拨的毫秒数。这条路径上不改分配器的任何状态，
    /// 等系统时间追上来之后再调用就能恢复
    #[error("时钟回拨，拒绝分配id，需等待{0}毫秒")]
    ClockMovedBackwards(i64),
    /// 进程启动时拿不到节点标识，直接失败，不能静默用默认值顶替
    #[error("无法获取主机名: {0}")]
    NodeIdentifierUnavailable(String),
}
