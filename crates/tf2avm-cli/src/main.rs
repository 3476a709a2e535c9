#[tokio::main]
async fn main() {
    let code = match tf2avm_cli::run(std::env::args_os()).await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<clap::Error>() {
            Some(clap_error) => clap_error.exit(),
            None => {
                eprintln!("error: {e:#}");
                1
            }
        },
    };
    std::process::exit(code);
}
