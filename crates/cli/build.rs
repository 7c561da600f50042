fn main() {
    let mut features = vec!["base".to_string()];
    if cfg!(feature = "local-inference") {
        features.push("local-inference".to_string());
    }
    println!("cargo:rustc-env=DATACHAT_FEATURES={}", features.join(", "));
}
