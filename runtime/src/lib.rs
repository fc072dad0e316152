use std::alloc::{alloc_zeroed, Layout};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::thread;
use std::time::Duration;


#[no_mangle]
pub extern "C" fn rt_print_int(x: i64) {
    println!("{}", x);
}


#[no_mangle]
pub extern "C" fn rt_print_float(x: f64) {
    println!("{}", x);
}


#[no_mangle]
pub extern "C" fn rt_print_bool(x: bool) {
    println!("{}", x);
}


/// # Safety
/// `s` must point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn rt_print_str(s: *const c_char) {
    if s.is_null() {
        println!();
        return;
    }
    println!("{}", CStr::from_ptr(s).to_string_lossy());
}


fn duration(nanos: i64) -> Duration {
    Duration::from_nanos(nanos.max(0) as u64)
}


#[no_mangle]
pub extern "C" fn rt_print_duration(nanos: i64) {
    println!("{:?}", duration(nanos));
}


#[no_mangle]
pub extern "C" fn rt_sleep(nanos: i64) {
    thread::sleep(duration(nanos));
}


/// Zeroed memory for an object. Objects are never freed.
#[no_mangle]
pub extern "C" fn rt_alloc(size: i64) -> *mut u8 {
    let size = (size.max(1)) as usize;
    match Layout::from_size_align(size, 8) {
        Ok(layout) => unsafe { alloc_zeroed(layout) },
        Err(_) => std::ptr::null_mut(),
    }
}


#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::{duration, rt_alloc, rt_sleep};

    #[test]
    fn durations() {
        assert_eq!(duration(1_500_000), Duration::from_micros(1_500));
        assert_eq!(duration(-5), Duration::from_nanos(0));
        assert_eq!(format!("{:?}", duration(1_500_000_000)), "1.5s");
    }

    #[test]
    fn sleep_waits() {
        let start = Instant::now();
        rt_sleep(2_000_000);
        assert!(start.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn allocations_are_zeroed() {
        let p = rt_alloc(24);
        assert!(!p.is_null());
        let bytes = unsafe { std::slice::from_raw_parts(p, 24) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert!(!rt_alloc(0).is_null());
    }
}
