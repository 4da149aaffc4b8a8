//! 라이브 버퍼 -- 최근 트래픽 레코드의 고정 용량 FIFO
//!
//! 캡처 세션이 쓰고, 표현 계층(REST 등)은 [`LiveBuffer::snapshot`]으로
//! 복사본만 읽습니다. 핸들은 `Clone`으로 공유합니다.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flowguard_core::types::TrafficRecord;

/// 최근 트래픽 레코드 버퍼
#[derive(Debug, Clone)]
pub struct LiveBuffer {
    inner: Arc<Mutex<VecDeque<TrafficRecord>>>,
    capacity: usize,
}

impl LiveBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    // 쓰기 도중 패닉이 나도 버퍼 내용은 항상 유효하므로 poison을 무시합니다.
    fn lock(&self) -> MutexGuard<'_, VecDeque<TrafficRecord>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 레코드를 추가합니다. 가득 차 있으면 가장 오래된 레코드를 버립니다.
    pub fn push(&self, record: TrafficRecord) {
        let mut buf = self.lock();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(record);
    }

    /// 전체 복사본 (오래된 것부터)
    pub fn snapshot(&self) -> Vec<TrafficRecord> {
        self.lock().iter().cloned().collect()
    }

    /// 최근 `n`개 (오래된 것부터)
    pub fn latest(&self, n: usize) -> Vec<TrafficRecord> {
        let buf = self.lock();
        let skip = buf.len().saturating_sub(n);
        buf.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
