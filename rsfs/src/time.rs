//! Conversions between the on-disk 48.16 fixed-point timestamps and
//! `SystemTime`. The fraction maps through `nsec * 128 / 1953125`
//! (65536 / 10^9 reduced), rounded half to even in both directions.

use std::time::{Duration, SystemTime};

use crate::data::SfsTime;

const NSEC_NUM: i64 = 128;
const NSEC_DEN: i64 = 1953125;

fn div_round_half_even(n: i64, d: i64) -> i64 {
	debug_assert!(n >= 0 && d > 0);
	let q = n / d;
	let r = n % d;
	match (2 * r).cmp(&d) {
		std::cmp::Ordering::Less => q,
		std::cmp::Ordering::Greater => q + 1,
		std::cmp::Ordering::Equal => q + (q & 1),
	}
}

pub fn from_parts(sec: i64, nsec: u32) -> SfsTime {
	(sec << 16) + div_round_half_even(nsec as i64 * NSEC_NUM, NSEC_DEN)
}

pub fn to_parts(ts: SfsTime) -> (i64, u32) {
	let sec = ts >> 16;
	let frac = ts & 0xffff;
	let nsec = div_round_half_even(frac * NSEC_DEN, NSEC_NUM);
	(sec, nsec as u32)
}

pub fn to_system(ts: SfsTime) -> SystemTime {
	let (mut s, ns) = to_parts(ts);
	let neg = s < 0;
	if neg {
		s = -s;
	}
	let dur = Duration::new(s as u64, ns);
	let mut time = SystemTime::UNIX_EPOCH;
	if neg {
		time -= dur;
	} else {
		time += dur;
	}
	time
}

pub fn from_system(t: SystemTime) -> SfsTime {
	match t.duration_since(SystemTime::UNIX_EPOCH) {
		Ok(d) => from_parts(d.as_secs() as i64, d.subsec_nanos()),
		Err(e) => {
			let d = e.duration();
			-from_parts(d.as_secs() as i64, d.subsec_nanos())
		}
	}
}

pub fn now() -> SfsTime {
	from_system(SystemTime::now())
}
