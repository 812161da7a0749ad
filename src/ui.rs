const BANNER_WIDTH: usize = 84;
const KEY_WIDTH: usize = 14;
const LOGO: &[&str] = &[
    " ____  _____    _    ____ _   _ ",
    "|  _ \\| ____|  / \\  / ___| | | |",
    "| |_) |  _|   / _ \\| |   | |_| |",
    "|  __/| |___ / ___ \\ |___|  _  |",
    "|_|   |_____/_/   \\_\\____|_| |_|",
];

pub fn startup_banner(title: &str, subtitle: &str, lines: &[(&str, String)]) {
    let border = "=".repeat(BANNER_WIDTH);
    let divider = "-".repeat(BANNER_WIDTH);
    println!();
    println!("{border}");
    for line in LOGO {
        println!("{:^width$}", line, width = BANNER_WIDTH);
    }
    println!("{divider}");
    println!("{:^width$}", title, width = BANNER_WIDTH);
    println!("{:^width$}", subtitle, width = BANNER_WIDTH);
    println!("{border}");
    for (key, value) in lines {
        println!(
            "  {:<key_width$} {}",
            format!("{key}:"),
            value,
            key_width = KEY_WIDTH
        );
    }
    println!("{border}");
    println!();
}

pub fn info(tag: &str, message: impl AsRef<str>) {
    println!("{} {}", prefix("INFO", tag), message.as_ref());
}

pub fn success(tag: &str, message: impl AsRef<str>) {
    println!("{} {}", prefix(" OK ", tag), message.as_ref());
}

pub fn warn(tag: &str, message: impl AsRef<str>) {
    eprintln!("{} {}", prefix("WARN", tag), message.as_ref());
}

pub fn error(tag: &str, message: impl AsRef<str>) {
    eprintln!("{} {}", prefix("ERR ", tag), message.as_ref());
}

fn prefix(level: &str, tag: &str) -> String {
    format!("[{level}][{tag:<8}]")
}
