//! Chrome trace output.
//!
//! Scopes may be recorded from any thread; tasks run by the scheduler are
//! written with their own track id so parallelism is visible in the trace.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(false);
static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_complete(
        &mut self,
        name: &str,
        tid: usize,
        start: Instant,
        end: Instant,
    ) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"name\": {:?}, \"tid\": {}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            name,
            tid,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros()
        )
    }

    fn close(&mut self) -> std::io::Result<()> {
        let start = self.start;
        self.write_complete("main", 0, start, Instant::now())?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    *TRACE.lock().unwrap() = Some(trace);
    ENABLED.store(true, Ordering::Release);
    Ok(())
}

pub fn enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Record a span that has already finished.
pub fn write_complete(name: &str, tid: usize, start: Instant, end: Instant) {
    if !enabled() {
        return;
    }
    if let Some(t) = TRACE.lock().unwrap().as_mut() {
        // A trace that can't be written is not worth failing the build for.
        let _ = t
            .write_complete(name, tid, start, end)
            .and_then(|_| writeln!(t.w, ","));
    }
}

#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    write_complete(name, 0, start, Instant::now());
    result
}

pub fn close() -> std::io::Result<()> {
    ENABLED.store(false, Ordering::Release);
    if let Some(mut t) = TRACE.lock().unwrap().take() {
        return t.close();
    }
    Ok(())
}
