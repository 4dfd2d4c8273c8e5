use clap::{Arg, ArgAction, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("Secret used to sign access and refresh tokens (HS256)")
                .env("ADMINKIT_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token lifetime, also the system config cache TTL")
                .default_value("1800")
                .env("ADMINKIT_ACCESS_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token lifetime")
                .default_value("604800")
                .env("ADMINKIT_REFRESH_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("captcha-enabled")
                .long("captcha-enabled")
                .help("Require a captcha answer on login")
                .env("ADMINKIT_CAPTCHA_ENABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("captcha-ttl-seconds")
                .long("captcha-ttl-seconds")
                .help("How long an issued captcha stays valid")
                .default_value("120")
                .env("ADMINKIT_CAPTCHA_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("admin-password")
                .long("admin-password")
                .help("Password of the first administrator, seeded while no user exists")
                .env("ADMINKIT_ADMIN_PASSWORD")
                .hide_env_values(true),
        )
}
