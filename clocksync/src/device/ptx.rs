//! Device-side routines as PTX, assembled per counter variant and JIT
//! compiled by the driver at module load.
//!
//! `sample_clock(ready, start, end, sample)` runs the device half of the
//! handshake. `spin_clock(ticks)` busy-waits until its own counter shows
//! `ticks` elapsed. Both are launched on a single thread.

use crate::counter::CounterKind;

pub const SAMPLE_ENTRY: &str = "sample_clock";
pub const SPIN_ENTRY: &str = "spin_clock";

const HEADER_GLOBALTIMER: &str = "\
.version 4.0
.target sm_30
.address_size 64
";

const HEADER_CLOCK: &str = "\
.version 4.0
.target sm_20
.address_size 64
";

// hi, lo, hi; a changed high word means the low word rolled over, so it is
// dropped.
const READ_GLOBALTIMER: &str = "\
	mov.u32 	%r_hi0, %globaltimer_hi;
	mov.u32 	%r_lo, %globaltimer_lo;
	mov.u32 	%r_hi1, %globaltimer_hi;
	setp.ne.u32 	%p_torn, %r_hi0, %r_hi1;
	@%p_torn mov.u32 	%r_lo, 0;
	mov.b64 	%rd_now, {%r_lo, %r_hi1};
";

const READ_CLOCK: &str = "\
	mov.u32 	%r_lo, %clock;
	cvt.u64.u32 	%rd_now, %r_lo;
";

const SAMPLE_KERNEL: &str = "\
.visible .entry sample_clock(
	.param .u64 ready_ptr,
	.param .u64 start_ptr,
	.param .u64 end_ptr,
	.param .u64 sample_ptr
)
{
	.reg .pred 	%p_wait, %p_torn;
	.reg .u32 	%r_one, %r_flag, %r_hi0, %r_lo, %r_hi1;
	.reg .u64 	%rd_ready, %rd_start, %rd_end, %rd_sample, %rd_now;

	ld.param.u64 	%rd_ready, [ready_ptr];
	ld.param.u64 	%rd_start, [start_ptr];
	ld.param.u64 	%rd_end, [end_ptr];
	ld.param.u64 	%rd_sample, [sample_ptr];
	cvta.to.global.u64 	%rd_ready, %rd_ready;
	cvta.to.global.u64 	%rd_start, %rd_start;
	cvta.to.global.u64 	%rd_end, %rd_end;
	cvta.to.global.u64 	%rd_sample, %rd_sample;

	mov.u32 	%r_one, 1;
	st.volatile.global.u32 	[%rd_ready], %r_one;
	membar.sys;
WAIT_START:
	ld.volatile.global.u32 	%r_flag, [%rd_start];
	setp.eq.u32 	%p_wait, %r_flag, 0;
	@%p_wait bra 	WAIT_START;
{{READ}}\
	st.global.u64 	[%rd_sample], %rd_now;
	membar.sys;
	st.volatile.global.u32 	[%rd_end], %r_one;
	ret;
}
";

const SPIN_KERNEL_GLOBALTIMER: &str = "\
.visible .entry spin_clock(
	.param .u64 ticks
)
{
	.reg .pred 	%p_wait, %p_torn;
	.reg .u32 	%r_hi0, %r_lo, %r_hi1;
	.reg .u64 	%rd_ticks, %rd_begin, %rd_elapsed, %rd_now;

	ld.param.u64 	%rd_ticks, [ticks];
{{READ}}\
	mov.u64 	%rd_begin, %rd_now;
SPIN:
{{READ}}\
	sub.u64 	%rd_elapsed, %rd_now, %rd_begin;
	setp.lt.u64 	%p_wait, %rd_elapsed, %rd_ticks;
	@%p_wait bra 	SPIN;
	ret;
}
";

// The running total outgrows 32 bits on long spins, so wrapping deltas
// between consecutive samples are summed into a 64-bit register.
const SPIN_KERNEL_CLOCK: &str = "\
.visible .entry spin_clock(
	.param .u64 ticks
)
{
	.reg .pred 	%p_wait;
	.reg .u32 	%r_prev, %r_cur, %r_delta;
	.reg .u64 	%rd_ticks, %rd_total, %rd_delta;

	ld.param.u64 	%rd_ticks, [ticks];
	mov.u64 	%rd_total, 0;
	mov.u32 	%r_prev, %clock;
SPIN:
	mov.u32 	%r_cur, %clock;
	sub.u32 	%r_delta, %r_cur, %r_prev;
	cvt.u64.u32 	%rd_delta, %r_delta;
	add.u64 	%rd_total, %rd_total, %rd_delta;
	mov.u32 	%r_prev, %r_cur;
	setp.lt.u64 	%p_wait, %rd_total, %rd_ticks;
	@%p_wait bra 	SPIN;
	ret;
}
";

/// Full PTX module text for the given counter variant.
pub fn module_source(kind: CounterKind) -> String {
    let (header, read, spin) = match kind {
        CounterKind::GlobalTimer => (HEADER_GLOBALTIMER, READ_GLOBALTIMER, SPIN_KERNEL_GLOBALTIMER),
        CounterKind::Clock32 => (HEADER_CLOCK, READ_CLOCK, SPIN_KERNEL_CLOCK),
    };
    let mut src = String::with_capacity(4096);
    src.push_str(header);
    src.push('\n');
    src.push_str(&SAMPLE_KERNEL.replace("{{READ}}", read));
    src.push('\n');
    src.push_str(&spin.replace("{{READ}}", read));
    src
}
