/// Create a [`Tensor`](crate::core::Tensor) from a (nested) array literal, e.g. `tensor!([[1.0], [2.0]])`.
#[macro_export]
macro_rules! tensor {
    ([$($x:tt)*]) => {
        $crate::core::Tensor::from_array($crate::ndarray::array![$($x)*].into_dyn())
    };
}

/// Create a [`Vec<Tensor>`] from a list of array literals, one sample per entry.
#[macro_export]
macro_rules! tensor_vec {
    ($($x:tt),* $(,)?) => {
        vec![$($crate::tensor!($x),)*]
    };
}

/// Decide if two tensors are equal.
///
/// Defaultly, the tensors are considered equal if they have the same shape and values whose summed squared difference is less than 1e-6.
///
/// You can also explicitly specify the tolerance by passing a third argument.
#[macro_export]
macro_rules! tensor_eq {
    ($a:expr, $b:expr) => {
        $crate::core::Tensor::allclose(&$a, &$b, 1e-6)
    };
    ($a:expr, $b:expr, $c:expr) => {
        $crate::core::Tensor::allclose(&$a, &$b, $c)
    };
}

/// Assert if two tensors are equal. See [`tensor_eq!`] for the tolerance.
#[macro_export]
macro_rules! assert_tensor_eq {
    ($a:expr, $b:expr) => {
        assert!($crate::tensor_eq!($a, $b), "{:?} != {:?}", $a, $b);
    };
    ($a:expr, $b:expr, $c:expr) => {
        assert!($crate::tensor_eq!($a, $b, $c), "{:?} != {:?}", $a, $b);
    };
}
