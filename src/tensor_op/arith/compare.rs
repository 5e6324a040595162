//! Comparisons and logical connectives. All produce bool tensors and have no
//! gradient.

use crate::{
    tensor_grad::{DType, Tensor},
    tensor_op::{
        error::Result,
        infer::{binary_predicate, unary_same},
        kernel::{compare, map_unary},
        operation::{DTypeClass, ForwardContext, OpKind, OperatorDescriptor},
        registry::Registry,
    },
};

macro_rules! predicate {
    ($name:ident, $op:tt) => {
        fn $name(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
            Ok(vec![compare(
                ctx.op,
                ctx.input(0),
                ctx.input(1),
                |x, y| x $op y,
                |x, y| x $op y,
            )?])
        }
    };
}

predicate!(equal_forward, ==);
predicate!(not_equal_forward, !=);
predicate!(less_forward, <);
predicate!(less_equal_forward, <=);
predicate!(greater_forward, >);
predicate!(greater_equal_forward, >=);

fn logical_and_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![compare(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        |x, y| x != 0.0 && y != 0.0,
        |x, y| x != 0 && y != 0,
    )?])
}

fn logical_or_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![compare(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        |x, y| x != 0.0 || y != 0.0,
        |x, y| x != 0 || y != 0,
    )?])
}

fn logical_not_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), DType::Bool, |x| {
        if x == 0.0 {
            1.0
        } else {
            0.0
        }
    })])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    let comparisons: [(&'static str, DTypeClass, fn(&ForwardContext) -> Result<Vec<Tensor>>); 6] = [
        ("Equal", DTypeClass::Any, equal_forward),
        ("NotEqual", DTypeClass::Any, not_equal_forward),
        ("Less", DTypeClass::Numeric, less_forward),
        ("LessEqual", DTypeClass::Numeric, less_equal_forward),
        ("Greater", DTypeClass::Numeric, greater_forward),
        ("GreaterEqual", DTypeClass::Numeric, greater_equal_forward),
    ];
    for &(name, dtypes, forward) in comparisons.iter() {
        registry.register(
            OperatorDescriptor::new(name, OpKind::Math, binary_predicate, forward)
                .input("x", dtypes)
                .input("y", dtypes),
        )?;
    }
    registry.register(
        OperatorDescriptor::new("LogicalAnd", OpKind::Math, binary_predicate, logical_and_forward)
            .input("x", DTypeClass::Bool)
            .input("y", DTypeClass::Bool),
    )?;
    registry.register(
        OperatorDescriptor::new("LogicalOr", OpKind::Math, binary_predicate, logical_or_forward)
            .input("x", DTypeClass::Bool)
            .input("y", DTypeClass::Bool),
    )?;
    registry.register(
        OperatorDescriptor::new("LogicalNot", OpKind::Math, unary_same, logical_not_forward)
            .input("x", DTypeClass::Bool),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::tensor_op::operation_ir::Attributes;

    use super::*;

    #[test]
    fn comparisons_broadcast_to_bool() {
        let registry = Registry::global();
        let x = Tensor::from_vec(vec![3], vec![1.0_f32, 2.0, 3.0]).unwrap();
        let y = Tensor::scalar(2.0_f32);
        let less = registry
            .execute1("Less", &[x.clone().into(), y.clone().into()], &Attributes::new())
            .unwrap();
        assert_eq!(less.to_vec::<bool>(), Some(vec![true, false, false]));
        let equal = registry
            .execute1("Equal", &[x.into(), y.into()], &Attributes::new())
            .unwrap();
        assert_eq!(equal.to_vec::<bool>(), Some(vec![false, true, false]));
    }

    #[test]
    fn logical_connectives() {
        let registry = Registry::global();
        let p = Tensor::from_vec(vec![4], vec![true, true, false, false]).unwrap();
        let q = Tensor::from_vec(vec![4], vec![true, false, true, false]).unwrap();
        let and = registry
            .execute1("LogicalAnd", &[p.clone().into(), q.clone().into()], &Attributes::new())
            .unwrap();
        let or = registry
            .execute1("LogicalOr", &[p.clone().into(), q.into()], &Attributes::new())
            .unwrap();
        let not = registry
            .execute1("LogicalNot", &[p.into()], &Attributes::new())
            .unwrap();
        assert_eq!(and.to_vec::<bool>(), Some(vec![true, false, false, false]));
        assert_eq!(or.to_vec::<bool>(), Some(vec![true, true, true, false]));
        assert_eq!(not.to_vec::<bool>(), Some(vec![false, false, true, true]));
    }

    #[test]
    fn logical_ops_need_bool() {
        let x = Tensor::ones(DType::I32, &[2]);
        assert!(Registry::global()
            .execute("LogicalNot", &[x.into()], &Attributes::new())
            .is_err());
    }
}
