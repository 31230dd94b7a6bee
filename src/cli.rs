use clap::{Arg, Command};

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("配置文件路径，缺省时依次查找 config/ensemble.toml 与 ensemble.toml")
}

/// 命令行定义
pub fn build_cli() -> Command {
    Command::new("ensemble")
        .version(env!("CARGO_PKG_VERSION"))
        .about("集合数据同化调度系统")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("运行集合同化")
                .arg(config_arg())
                .arg(
                    Arg::new("log-level")
                        .short('l')
                        .long("log-level")
                        .value_name("LEVEL")
                        .help("日志级别，覆盖配置文件")
                        .value_parser(["trace", "debug", "info", "warn", "error"]),
                )
                .arg(
                    Arg::new("log-format")
                        .long("log-format")
                        .value_name("FORMAT")
                        .help("日志格式，覆盖配置文件")
                        .value_parser(["json", "pretty"]),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("检查配置与观测算子")
                .arg(config_arg()),
        )
}
