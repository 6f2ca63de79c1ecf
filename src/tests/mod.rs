mod test_driver;
mod test_subspace;

pub(crate) fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) const TOL: f64 = 1e-9;
