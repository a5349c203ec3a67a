//! 基于snowflake理论的64位唯一id分配器，用主机名+PID的hash低16位作为workerId：
//! (a) id构成(高位到低位): 39位时间前缀 + 16位节点标识 + 9位毫秒内sequence
//!     (9位不够用时自旋强制得到新的时间前缀)
//! (b) 对系统时间的依赖性非常强。检测到时钟回拨后将拒绝分配id

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::errors::my_errors::{MyError, RetResult};

/// 时间起始基准点(毫秒)。固定不变，改了会破坏已发id之间的相对有序性
const EPOCH: i64 = 1_451_577_600_605;
/// 毫秒内自增位数
const SEQUENCE_BITS: i64 = 9;
/// worker标识位数
const WORKER_ID_BITS: i64 = 16;
/// 毫秒内最大自增序列值:511
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
/// workerId左移位数
const WORKER_ID_SHIFT: i64 = SEQUENCE_BITS;
/// 时间戳左移位数
const TIMESTAMP_SHIFT: i64 = SEQUENCE_BITS + WORKER_ID_BITS;
/// last_timestamp_ms的哨兵值，表示这个实例还没发过id
const NO_TIMESTAMP: i64 = -1;

/// 发号用的可变状态，只允许在next_id的临界区内修改
struct GeneratorState {
    /// 上次分配id的毫秒时间戳
    last_timestamp_ms: i64,
    /// 毫秒内序列(0-511)
    sequence: i64,
}

/// 每个进程在组合根处构造一个实例，整个进程生命周期内共用。
/// 多线程直接共享&self调用即可，内部用一把锁串行化
pub struct UniqueIdGenerator {
    /// 进程启动时算好，之后只读，访问不走锁
    worker_id: u16,
    state: Mutex<GeneratorState>,
}

impl UniqueIdGenerator {
    /// 构造分配器。拿不到主机名时直接返回错误让进程初始化失败，
    /// workerId不稳定的话唯一性就没保障了
    pub fn new() -> RetResult<Self> {
        let worker_id = derive_worker_id()?;
        info!("workerId:{}, pid:{}", worker_id, std::process::id());
        Ok(Self {
            worker_id,
            state: Mutex::new(GeneratorState {
                last_timestamp_ms: NO_TIMESTAMP,
                sequence: 0,
            }),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// 分配一个64位唯一id
    ///
    /// 同一毫秒内sequence加一(0-511循环)，512个发完就自旋等到下一毫秒；
    /// 新的毫秒sequence从0开始。时钟回拨时返回ClockMovedBackwards
    pub fn next_id(&self) -> Result<i64, MyError> {
        let mut state = self.state.lock().unwrap();

        let mut timestamp = current_time_millis();

        // 回拨检查必须放在最前面，出错路径不能动sequence和last_timestamp_ms
        if timestamp < state.last_timestamp_ms {
            let offset = state.last_timestamp_ms - timestamp;
            error!("时钟回拨，拒绝分配id，需等待{}毫秒", offset);
            return Err(MyError::ClockMovedBackwards(offset));
        }

        if timestamp == state.last_timestamp_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // 这一毫秒的512个都发完了，等时钟走到下一毫秒
                timestamp = wait_next_millis(state.last_timestamp_ms);
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp_ms = timestamp;

        Ok((timestamp - EPOCH) << TIMESTAMP_SHIFT
            | (self.worker_id as i64) << WORKER_ID_SHIFT
            | state.sequence)
    }
}

/// 主机名+pid拼成文本做SHA-256，取低16位作为workerId。
/// 不同机器/进程间不保证绝对不碰撞，这是设计上接受的概率
fn derive_worker_id() -> RetResult<u16> {
    let node = hostname::get().map_err(|e| MyError::NodeIdentifierUnavailable(e.to_string()))?;
    let text = format!("{}{}", node.to_string_lossy(), std::process::id());
    let digest = Sha256::digest(text.as_bytes());
    // 摘要最后两个字节就是低16位
    Ok(u16::from_be_bytes([digest[30], digest[31]]))
}

/// 自旋等待下一毫秒的到来，返回第一个严格大于last_timestamp_ms的时间
fn wait_next_millis(last_timestamp_ms: i64) -> i64 {
    let mut timestamp = current_time_millis();
    while timestamp <= last_timestamp_ms {
        std::hint::spin_loop();
        timestamp = current_time_millis();
    }
    timestamp
}

/// 获得系统当前毫秒数
fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// 从id里取出绝对毫秒时间戳(含纪元)
pub fn timestamp_millis(id: i64) -> i64 {
    ((id as u64) >> TIMESTAMP_SHIFT) as i64 + EPOCH
}

/// 从id里取出workerId
pub fn worker_id_of(id: i64) -> u16 {
    ((id >> WORKER_ID_SHIFT) & 0xFFFF) as u16
}

/// 从id里取出毫秒内序列
pub fn sequence_of(id: i64) -> i64 {
    id & SEQUENCE_MASK
}

#[cfg(test)]
impl UniqueIdGenerator {
    /// 测试专用：直接改写内部状态，模拟时钟回拨之类的场景
    fn force_state(&self, last_timestamp_ms: i64, sequence: i64) {
        let mut state = self.state.lock().unwrap();
        state.last_timestamp_ms = last_timestamp_ms;
        state.sequence = sequence;
    }

    fn peek_state(&self) -> (i64, i64) {
        let state = self.state.lock().unwrap();
        (state.last_timestamp_ms, state.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_stable() {
        // 同一个进程里主机名和pid都不变，推导出来的workerId必须一致
        let w1 = derive_worker_id().unwrap();
        let w2 = derive_worker_id().unwrap();
        assert_eq!(w1, w2);

        let g1 = UniqueIdGenerator::new().unwrap();
        let g2 = UniqueIdGenerator::new().unwrap();
        assert_eq!(g1.worker_id(), w1);
        assert_eq!(g1.worker_id(), g2.worker_id());
    }

    #[test]
    fn test_bit_roundtrip() {
        let generator = UniqueIdGenerator::new().unwrap();
        let before = current_time_millis();
        let id = generator.next_id().unwrap();
        let after = current_time_millis();

        assert_eq!(worker_id_of(id), generator.worker_id());
        assert!((0..=SEQUENCE_MASK).contains(&sequence_of(id)));
        let ts = timestamp_millis(id);
        assert!(ts >= before && ts <= after);

        // 按文档里的位布局重新拼装，必须还原出同一个id
        let repacked = (ts - EPOCH) << TIMESTAMP_SHIFT
            | (worker_id_of(id) as i64) << WORKER_ID_SHIFT
            | sequence_of(id);
        assert_eq!(repacked, id);
    }

    #[test]
    fn test_monotonic_and_sequence_rules() {
        let generator = UniqueIdGenerator::new().unwrap();
        let mut last = generator.next_id().unwrap();
        for _ in 0..4096 {
            let id = generator.next_id().unwrap();
            assert!(id > last, "id必须严格递增: {} -> {}", last, id);
            if timestamp_millis(id) == timestamp_millis(last) {
                // 同一毫秒内sequence逐一递增
                assert_eq!(sequence_of(id), sequence_of(last) + 1);
            } else {
                // 跨毫秒(包括512个发完自旋到下一毫秒)sequence回到0
                assert_eq!(sequence_of(id), 0);
            }
            last = id;
        }
    }

    #[test]
    fn test_clock_regression() {
        let generator = UniqueIdGenerator::new().unwrap();
        generator.next_id().unwrap();

        // 把last_timestamp_ms推到未来，等价于系统时钟往回拨了
        let future = current_time_millis() + 10_000;
        generator.force_state(future, 7);

        match generator.next_id() {
            Err(MyError::ClockMovedBackwards(offset)) => {
                assert!(offset > 9_000 && offset <= 10_000, "回拨量:{}", offset);
            }
            other => panic!("期望ClockMovedBackwards, 实际:{:?}", other),
        }
        // 出错路径不能改状态
        assert_eq!(generator.peek_state(), (future, 7));

        // 时钟追上之后恢复正常发号
        generator.force_state(NO_TIMESTAMP, 0);
        let id = generator.next_id().unwrap();
        assert_eq!(sequence_of(id), 0);
    }
}
