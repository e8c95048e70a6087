use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;

pub const CPU_THREADS_ENV: &str = "RECON_CPU_THREADS";

static THREAD_POOL_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the global Rayon thread pool used by detection, matching and filtering.
///
/// Priority:
/// 1. `num_threads` argument
/// 2. `RECON_CPU_THREADS` environment variable
/// 3. Rayon default
pub fn init_global_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    let res = THREAD_POOL_INIT.get_or_init(|| {
        let configured_threads = match num_threads {
            Some(n) => Some(n),
            None => read_cpu_threads_from_env()?,
        };

        let mut builder = ThreadPoolBuilder::new();
        if let Some(n) = configured_threads {
            if n == 0 {
                return Err(format!("{CPU_THREADS_ENV} must be >= 1"));
            }
            builder = builder.num_threads(n);
        }

        builder.build_global().map_err(|e| e.to_string())
    });
    res.clone()
}

pub fn current_cpu_threads() -> usize {
    rayon::current_num_threads()
}

fn read_cpu_threads_from_env() -> Result<Option<usize>, String> {
    let raw = match env::var(CPU_THREADS_ENV) {
        Ok(v) => v,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => return Err(format!("failed to read {CPU_THREADS_ENV}: {e}")),
    };
    parse_thread_count(&raw).map(Some)
}

fn parse_thread_count(raw: &str) -> Result<usize, String> {
    let parsed: usize = raw
        .trim()
        .parse()
        .map_err(|_| format!("{CPU_THREADS_ENV} must be a positive integer, got '{raw}'"))?;
    if parsed == 0 {
        return Err(format!("{CPU_THREADS_ENV} must be >= 1"));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_thread_count_accepts_positive() {
        assert_eq!(parse_thread_count("4"), Ok(4));
        assert_eq!(parse_thread_count(" 2 "), Ok(2));
    }

    #[test]
    fn parse_thread_count_rejects_zero_and_garbage() {
        assert!(parse_thread_count("0").is_err());
        assert!(parse_thread_count("many").is_err());
    }
}
