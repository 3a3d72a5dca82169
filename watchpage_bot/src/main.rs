use bot_commons::*;

fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        // TODO: Audit that the environment access only happens in single-threaded code.
        unsafe { std::env::set_var("RUST_LOG", "WARN,watchpage_bot=debug,bot_commons=info") };
    }
    start_everything(watchpage_bot::entry());
}
