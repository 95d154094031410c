use crate::config::TICK_MS;
use crate::error::KResult;
use crate::kernel::KernelCx;

/// Milliseconds since boot, at timer-tick resolution.
pub fn sys_time_msec(cx: &mut KernelCx) -> KResult<i32> {
    Ok(msec_of_ticks(cx.st.ticks) as i32)
}

pub fn msec_of_ticks(ticks: u32) -> u32 {
    ticks.wrapping_mul(TICK_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_ms_per_tick() {
        assert_eq!(msec_of_ticks(0), 0);
        assert_eq!(msec_of_ticks(25), 250);
    }
}
