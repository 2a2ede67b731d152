macro_rules! ensure_eq {
    ($a:expr, $b:expr) => {
        ensure!($a == $b)
    };
    ($a:expr, $b:expr, $($arg:tt)*) => {
        ensure!($a == $b, $($arg)*)
    };
}

#[cfg(test)]
macro_rules! oid {
    ($hex:expr) => {{
        #[allow(unused_imports)]
        use std::str::FromStr;
        crate::hash::Oid::from_str($hex).unwrap()
    }};
}
