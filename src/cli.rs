/// Command line surface of the judger binary
use crate::runner;
use crate::types::{JudgerConfig, DEFAULT_MAX_STACK, DEFAULT_RUN_ID, UNLIMITED};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "judger", version)]
#[command(about = "Run one untrusted executable under resource and syscall limits and print the verdict as JSON", long_about = None)]
pub struct Cli {
    /// Max CPU time in milliseconds (-1 for unlimited)
    #[arg(long = "max_cpu_time", default_value_t = UNLIMITED, allow_negative_numbers = true)]
    pub max_cpu_time: i64,

    /// Max wall clock time in milliseconds (-1 for unlimited)
    #[arg(long = "max_real_time", default_value_t = UNLIMITED, allow_negative_numbers = true)]
    pub max_real_time: i64,

    /// Max memory in bytes (-1 for unlimited)
    #[arg(long = "max_memory", default_value_t = UNLIMITED, allow_negative_numbers = true)]
    pub max_memory: i64,

    /// Only check memory usage, do not set the address space limit (0 or 1, bare flag means 1)
    #[arg(
        long = "memory_limit_check_only",
        default_value_t = 0,
        num_args = 0..=1,
        default_missing_value = "1",
        allow_negative_numbers = true
    )]
    pub memory_limit_check_only: i32,

    /// Max stack size in bytes
    #[arg(long = "max_stack", default_value_t = DEFAULT_MAX_STACK, allow_negative_numbers = true)]
    pub max_stack: i64,

    /// Max number of processes (-1 for unlimited)
    #[arg(long = "max_process_number", default_value_t = UNLIMITED, allow_negative_numbers = true)]
    pub max_process_number: i64,

    /// Max output size in bytes (-1 for unlimited)
    #[arg(long = "max_output_size", default_value_t = UNLIMITED, allow_negative_numbers = true)]
    pub max_output_size: i64,

    /// Executable to run
    #[arg(long = "exe_path")]
    pub exe_path: PathBuf,

    /// Input file
    #[arg(long = "input_path", default_value = "/dev/stdin")]
    pub input_path: PathBuf,

    /// Output file
    #[arg(long = "output_path", default_value = "/dev/stdout")]
    pub output_path: PathBuf,

    /// Error file
    #[arg(long = "error_path", default_value = "/dev/stderr")]
    pub error_path: PathBuf,

    /// Argument passed to the executable, repeatable
    #[arg(long = "args", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Environment entry (KEY=value), repeatable
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Judger log path
    #[arg(long = "log_path", default_value = "judger.log")]
    pub log_path: PathBuf,

    /// Seccomp rule name (c_cpp or general)
    #[arg(long = "seccomp_rule_name")]
    pub seccomp_rule_name: Option<String>,

    /// UID to run as (-1 keeps the current one)
    #[arg(
        long = "uid",
        default_value_t = DEFAULT_RUN_ID as i64,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(-1..=u32::MAX as i64)
    )]
    pub uid: i64,

    /// GID to run as (-1 keeps the current one)
    #[arg(
        long = "gid",
        default_value_t = DEFAULT_RUN_ID as i64,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(-1..=u32::MAX as i64)
    )]
    pub gid: i64,
}

impl Cli {
    /// Build the run configuration. Limits are passed through unchecked so
    /// the run itself reports bad values as INVALID_CONFIG.
    pub fn into_config(self) -> JudgerConfig {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.exe_path.to_string_lossy().into_owned());
        args.extend(self.args);

        JudgerConfig {
            max_cpu_time: limit(self.max_cpu_time),
            max_real_time: limit(self.max_real_time),
            max_memory: limit(self.max_memory),
            max_stack: self.max_stack,
            max_process_number: limit(self.max_process_number),
            max_output_size: limit(self.max_output_size),
            memory_limit_check_only: self.memory_limit_check_only != 0,
            exe_path: self.exe_path,
            input_path: Some(self.input_path),
            output_path: Some(self.output_path),
            error_path: Some(self.error_path),
            args,
            env: self.env,
            log_path: self.log_path,
            seccomp_rule_name: self.seccomp_rule_name,
            uid: u32::try_from(self.uid).ok(),
            gid: u32::try_from(self.gid).ok(),
        }
    }
}

fn limit(value: i64) -> Option<i64> {
    (value != UNLIMITED).then_some(value)
}

/// Parse the command line, run once and print the result
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.into_config();
    log::debug!("Judging with {:?}", config);

    let result = runner::run(&config);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
