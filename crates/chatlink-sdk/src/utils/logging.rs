use tracing::Level;

/// 安装 fmt 日志订阅者
///
/// 可以重复调用；已经安装过全局订阅者时直接返回 false。
pub fn init_logging(debug: bool) -> bool {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let _ = init_logging(true);
        assert!(!init_logging(false));
    }
}
