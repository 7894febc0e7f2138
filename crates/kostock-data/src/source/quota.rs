//! 세션별 요청 한도.

use std::sync::atomic::{AtomicU32, Ordering};

/// 세션 하나에 허용된 요청 수.
///
/// 증권사 TR 조회처럼 로그인 세션 단위로 요청 수가 제한되는 소스를 위한
/// 카운터입니다. 한도를 모두 쓰면 새 세션을 열어야 합니다.
#[derive(Debug)]
pub struct RequestQuota {
    limit: u32,
    used: AtomicU32,
}

impl RequestQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    /// 요청 하나를 예약합니다. 한도가 남아 있지 않으면 false.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    /// 남은 요청 수.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used.load(Ordering::Acquire))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exhausts_at_limit() {
        let quota = RequestQuota::new(2);
        assert!(quota.try_acquire());
        assert_eq!(quota.remaining(), 1);
        assert!(quota.try_acquire());
        assert!(!quota.try_acquire());
        assert_eq!(quota.remaining(), 0);
    }

    #[test]
    fn test_zero_quota() {
        let quota = RequestQuota::new(0);
        assert!(!quota.try_acquire());
        assert_eq!(quota.limit(), 0);
    }
}
