use browser_cli::run_askpass;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    match run_askpass().await {
        Ok(value) => println!("{value}"),
        Err(e) => {
            eprintln!("browser-askpass: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
