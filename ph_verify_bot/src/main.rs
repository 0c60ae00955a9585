use arch_bot_commons::*;

fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "WARN,ph_verify_bot=debug");
    }
    start_everything(ph_verify_bot::entry());
}
