/// Builds a `Shape` literal. `_` marks an inferred dimension; a trailing
/// `; ..` adds a flex tail.
///
/// ```
/// use symflow::shape;
/// let s = shape![2, _, 3];
/// let open = shape![2; ..];
/// ```
#[macro_export]
macro_rules! shape {
    (@dim _) => { $crate::Dim::inferred() };
    (@dim $n:expr) => { $crate::Dim::Known($n) };
    () => { $crate::Shape::scalar() };
    ($($d:tt),+ ; ..) => { $crate::Shape::flexible(vec![$($crate::shape!(@dim $d)),+]) };
    ($($d:tt),+ $(,)?) => { $crate::Shape::closed(vec![$($crate::shape!(@dim $d)),+]) };
}
