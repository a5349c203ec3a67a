#![allow(non_snake_case)]

use std::collections::HashSet;
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;
use tracing::{error, info};

use clap::Parser;

use WeiYi::{RetResult, UniqueIdGenerator};

fn main() -> RetResult<()> {
    let args = Args::parse(); // 先解析命令行参数
    init_logging(&args.log);

    // 组合根处显式构造，整个进程就这一个实例，拿不到主机名就直接退出
    let generator = UniqueIdGenerator::new()?;
    info!("冒烟测试开始, workerId:{}, count:{}", generator.worker_id(), args.count);

    let start = Instant::now();
    let mut seen = HashSet::with_capacity(args.count);
    for _ in 0..args.count {
        let id = generator.next_id()?;
        if !seen.insert(id) {
            error!("有重复的id:{}", id);
        }
    }

    let duration = start.elapsed();
    println!(
        "Completed {} ids in {:?} ({:.2} ids/s)",
        args.count,
        duration,
        args.count as f64 / duration.as_secs_f64()
    );

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about)] // 可选：添加命令行帮助信息
struct Args {
    /// 设置日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log: String,

    /// 冒烟测试要分配的id数量
    #[arg(short, long, default_value_t = 2_000_000)]
    count: usize,
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()  // 先尝试从 RUST_LOG 读取
        .or_else(|_| EnvFilter::try_new(log_level)) // 失败则用命令行参数
        .unwrap();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true) // false没有颜色，适合生产环境
        .with_timer(LocalTime::rfc_3339())
        .init();
}
