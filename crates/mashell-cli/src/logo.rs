use colored::Colorize;

const LOGO: &str = r#"
  __  __       ____  _          _ _
 |  \/  | __ _/ ___|| |__   ___| | |
 | |\/| |/ _` \___ \| '_ \ / _ \ | |
 | |  | | (_| |___) | | | |  __/ | |
 |_|  |_|\__,_|____/|_| |_|\___|_|_|
"#;

pub fn print_logo() {
    println!("{}", LOGO.cyan().bold());
    println!(
        "  {}  {}\n",
        "AI-powered command line assistant".dimmed(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
