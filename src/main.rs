/// judger: run one untrusted executable under resource and syscall limits
///
/// Must run as root. Prints the result as JSON on stdout and writes failures
/// to the judger log.
///
/// # Usage
/// ```bash
/// judger --exe_path /tmp/main --input_path 1.in --output_path 1.out \
///     --max_cpu_time 1000 --max_real_time 2000 --max_memory 134217728 \
///     --seccomp_rule_name c_cpp
/// ```
use anyhow::Result;

fn main() -> Result<()> {
    env_logger::init();
    judger::cli::run()
}
