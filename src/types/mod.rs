use ndarray::{ArrayD, IxDyn};
use std::fmt;

/// Element type tag carried by every expression and tensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float32,
    Float64,
    Int32,
    Int64,
    Utf8,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Utf8 => "string",
        };
        f.write_str(name)
    }
}

/// A dtype-erased tensor payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValue {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    Str(ArrayD<String>),
}

impl TensorValue {
    pub fn dtype(&self) -> DType {
        match self {
            TensorValue::F32(_) => DType::Float32,
            TensorValue::F64(_) => DType::Float64,
            TensorValue::I32(_) => DType::Int32,
            TensorValue::I64(_) => DType::Int64,
            TensorValue::Str(_) => DType::Utf8,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            TensorValue::F32(a) => a.shape(),
            TensorValue::F64(a) => a.shape(),
            TensorValue::I32(a) => a.shape(),
            TensorValue::I64(a) => a.shape(),
            TensorValue::Str(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn zeros(dtype: DType, dims: &[usize]) -> TensorValue {
        let ix = IxDyn(dims);
        match dtype {
            DType::Float32 => TensorValue::F32(ArrayD::zeros(ix)),
            DType::Float64 => TensorValue::F64(ArrayD::zeros(ix)),
            DType::Int32 => TensorValue::I32(ArrayD::zeros(ix)),
            DType::Int64 => TensorValue::I64(ArrayD::zeros(ix)),
            DType::Utf8 => TensorValue::Str(ArrayD::from_elem(ix, String::new())),
        }
    }

    /// A rank-0 value of the given numeric dtype.
    pub fn from_f64(v: f64, dtype: DType) -> Option<TensorValue> {
        let ix = IxDyn(&[]);
        match dtype {
            DType::Float32 => Some(TensorValue::F32(ArrayD::from_elem(ix, v as f32))),
            DType::Float64 => Some(TensorValue::F64(ArrayD::from_elem(ix, v))),
            DType::Int32 => Some(TensorValue::I32(ArrayD::from_elem(ix, v as i32))),
            DType::Int64 => Some(TensorValue::I64(ArrayD::from_elem(ix, v as i64))),
            DType::Utf8 => None,
        }
    }
}

impl fmt::Display for TensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorValue::F32(a) => write!(f, "{a}"),
            TensorValue::F64(a) => write!(f, "{a}"),
            TensorValue::I32(a) => write!(f, "{a}"),
            TensorValue::I64(a) => write!(f, "{a}"),
            TensorValue::Str(a) => write!(f, "{a}"),
        }
    }
}

/// Binds a Rust scalar type to its dtype tag and its `TensorValue` payload.
pub trait ElemType: Clone + std::fmt::Debug + 'static {
    const DTYPE: DType;
    fn into_value(arr: ArrayD<Self>) -> TensorValue;
    fn from_value(value: TensorValue) -> Option<ArrayD<Self>>;
}

impl ElemType for f32 {
    const DTYPE: DType = DType::Float32;
    fn into_value(arr: ArrayD<f32>) -> TensorValue {
        TensorValue::F32(arr)
    }
    fn from_value(value: TensorValue) -> Option<ArrayD<f32>> {
        match value {
            TensorValue::F32(a) => Some(a),
            _ => None,
        }
    }
}

impl ElemType for f64 {
    const DTYPE: DType = DType::Float64;
    fn into_value(arr: ArrayD<f64>) -> TensorValue {
        TensorValue::F64(arr)
    }
    fn from_value(value: TensorValue) -> Option<ArrayD<f64>> {
        match value {
            TensorValue::F64(a) => Some(a),
            _ => None,
        }
    }
}

impl ElemType for i32 {
    const DTYPE: DType = DType::Int32;
    fn into_value(arr: ArrayD<i32>) -> TensorValue {
        TensorValue::I32(arr)
    }
    fn from_value(value: TensorValue) -> Option<ArrayD<i32>> {
        match value {
            TensorValue::I32(a) => Some(a),
            _ => None,
        }
    }
}

impl ElemType for i64 {
    const DTYPE: DType = DType::Int64;
    fn into_value(arr: ArrayD<i64>) -> TensorValue {
        TensorValue::I64(arr)
    }
    fn from_value(value: TensorValue) -> Option<ArrayD<i64>> {
        match value {
            TensorValue::I64(a) => Some(a),
            _ => None,
        }
    }
}

impl ElemType for String {
    const DTYPE: DType = DType::Utf8;
    fn into_value(arr: ArrayD<String>) -> TensorValue {
        TensorValue::Str(arr)
    }
    fn from_value(value: TensorValue) -> Option<ArrayD<String>> {
        match value {
            TensorValue::Str(a) => Some(a),
            _ => None,
        }
    }
}

/// Numeric element types (arithmetic, casts).
pub trait NumElem: ElemType + Copy + num_traits::NumCast {}

impl NumElem for f32 {}
impl NumElem for f64 {}
impl NumElem for i32 {}
impl NumElem for i64 {}

/// Floating element types (transcendental ops, gradients, convolution).
pub trait FloatElem: NumElem + num_traits::Float {}

impl FloatElem for f32 {}
impl FloatElem for f64 {}
