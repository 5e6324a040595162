use crate::{
    session::{Arg, Handle, Session, SessionConfig},
    tensor_grad::{DType, Tensor},
    tensor_op::{
        error::{OpError, Result},
        operation_ir::{Attributes, OpSpec},
        registry::Registry,
        Value,
    },
    utility::random_initialize,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct LinearNetwork {
    weights: Tensor,
    bias: Tensor,
}

impl LinearNetwork {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        LinearNetwork {
            weights: random_initialize(DType::F32, &[input_size, output_size], 0.5),
            bias: random_initialize(DType::F32, &[output_size], 0.5),
        }
    }

    pub fn forward(&self, session: &mut Session, input: Handle) -> Result<Handle> {
        let weights = session.parameter("weights", self.weights.clone())?;
        let bias = session.parameter("bias", self.bias.clone())?;
        let product = session.apply1("MatMul", &[input.into(), weights.into()], &Attributes::new())?;
        session.apply1("BiasAdd", &[product.into(), bias.into()], &Attributes::new())
    }

    /// Plain gradient descent through the `SGD` operator.
    pub fn update(&mut self, session: &Session, learning_rate: f64) -> Result<()> {
        let grads = session.parameter_grads()?;
        let registry = Registry::global();
        let attrs = Attributes::new().with("learning_rate", learning_rate);
        self.weights = registry.execute1(
            "SGD",
            &[(&self.weights).into(), (&grads["weights"]).into()],
            &attrs,
        )?;
        self.bias = registry.execute1("SGD", &[(&self.bias).into(), (&grads["bias"]).into()], &attrs)?;
        Ok(())
    }
}

fn mse(session: &mut Session, output: Handle, labels: Handle) -> Result<Handle> {
    let none = Attributes::new;
    let diff = session.apply1("Sub", &[output.into(), labels.into()], &none())?;
    let squared = session.apply1("Square", &[diff.into()], &none())?;
    session.apply1("ReduceMean", &[squared.into()], &none())
}

fn regression_data() -> (Tensor, Tensor) {
    let xs: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
    let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
    (
        Tensor::from_vec(vec![10, 1], xs).unwrap(),
        Tensor::from_vec(vec![10, 1], ys).unwrap(),
    )
}

/// Builds, runs and differentiates one training step, returning the loss.
fn training_step(network: &mut LinearNetwork, input: &Tensor, labels: &Tensor) -> f64 {
    let mut session = Session::with_config(SessionConfig::default());
    let x = session.feed(input.clone()).unwrap();
    let y = session.feed(labels.clone()).unwrap();
    let output = network.forward(&mut session, x).unwrap();
    let loss = mse(&mut session, output, y).unwrap();
    session.run().unwrap();
    session.backward(loss, None).unwrap();
    network.update(&session, 0.1).unwrap();
    session.value(loss).unwrap().read()[0]
}

#[test]
fn forward_pass_native() {
    init();
    let (input, labels) = regression_data();
    let network = LinearNetwork::new(1, 1);
    let mut session = Session::with_config(SessionConfig::default());
    let x = session.feed(input).unwrap();
    let y = session.feed(labels).unwrap();
    let output = network.forward(&mut session, x).unwrap();
    let cost = mse(&mut session, output, y).unwrap();
    assert_eq!(session.meta(output).unwrap().shape, vec![10, 1]);
    assert_eq!(session.meta(cost).unwrap().shape, Vec::<usize>::new());
    session.run().unwrap();
    assert!(session.value(cost).unwrap().all_finite());
}

#[test]
fn backward_pass_native() {
    init();
    let (input, labels) = regression_data();
    let mut network = LinearNetwork::new(1, 1);
    let initial = training_step(&mut network, &input, &labels);
    let mut last = initial;
    for _ in 0..100 {
        last = training_step(&mut network, &input, &labels);
    }
    assert!(
        last < initial * 0.5,
        "loss went from {} to {}",
        initial,
        last
    );
}

fn weight(index: usize) -> f64 {
    0.5 + 0.25 * ((index * 7) % 5) as f64
}

fn values(inputs: &[Tensor], tuple: bool) -> Vec<Value> {
    if tuple {
        vec![inputs.to_vec().into()]
    } else {
        inputs.iter().map(Value::from).collect()
    }
}

/// Weighted sum of the first output, so every element's sensitivity differs.
fn objective(op: &str, inputs: &[Tensor], tuple: bool, attrs: &Attributes) -> f64 {
    let out = Registry::global()
        .execute1(op, &values(inputs, tuple), attrs)
        .unwrap();
    out.read()
        .iter()
        .enumerate()
        .map(|(i, value)| value * weight(i))
        .sum()
}

/// Composed gradients of every float input against central differences.
fn check_gradient(op: &str, inputs: &[Tensor], tuple: bool, attrs: Attributes) {
    let slots: Vec<usize> = (0..inputs.len())
        .filter(|&slot| inputs[slot].dtype().is_float())
        .collect();
    check_gradient_wrt(op, inputs, tuple, attrs, &slots);
}

fn check_gradient_wrt(op: &str, inputs: &[Tensor], tuple: bool, attrs: Attributes, slots: &[usize]) {
    init();
    let mut session = Session::with_config(SessionConfig::default());
    let handles: Vec<Handle> = inputs
        .iter()
        .map(|input| session.feed(input.clone()).unwrap())
        .collect();
    let args: Vec<Arg> = if tuple {
        vec![handles.clone().into()]
    } else {
        handles.iter().map(Arg::from).collect()
    };
    let out = session.apply(op, &args, &attrs).unwrap()[0];
    let meta = session.meta(out).unwrap().clone();
    let weights: Vec<f64> = (0..meta.numel()).map(weight).collect();
    let weights = session
        .feed(Tensor::from_f64(meta.dtype, meta.shape, &weights).unwrap())
        .unwrap();
    let weighted = session
        .apply1("Mul", &[out.into(), weights.into()], &Attributes::new())
        .unwrap();
    let loss = session
        .apply1("ReduceSum", &[weighted.into()], &Attributes::new())
        .unwrap();
    session.run().unwrap();
    session.backward(loss, None).unwrap();

    let eps = 1e-6;
    for &slot in slots {
        let input = &inputs[slot];
        let analytic = session
            .grad(handles[slot])
            .unwrap()
            .unwrap_or_else(|| panic!("{} gave no gradient for input {}", op, slot))
            .read();
        let base = input.read();
        for element in 0..base.len() {
            let shifted = |delta: f64| {
                let mut perturbed = inputs.to_vec();
                let mut data = base.clone();
                data[element] += delta;
                perturbed[slot] =
                    Tensor::from_f64(input.dtype(), input.shape().to_vec(), &data).unwrap();
                objective(op, &perturbed, tuple, &attrs)
            };
            let numeric = (shifted(eps) - shifted(-eps)) / (2.0 * eps);
            let tolerance = 1e-5 * numeric.abs().max(1.0);
            assert!(
                (analytic[element] - numeric).abs() < tolerance,
                "{} input {} element {}: analytic {} numeric {}",
                op,
                slot,
                element,
                analytic[element],
                numeric
            );
        }
    }
}

fn tensor(shape: &[usize], values: &[f64]) -> Tensor {
    Tensor::from_f64(DType::F64, shape.to_vec(), values).unwrap()
}

fn none() -> Attributes {
    Attributes::new()
}

#[test]
fn broadcast_arithmetic_gradients() {
    let x = tensor(&[2, 3], &[0.5, -1.0, 2.0, 1.25, 0.25, -0.75]);
    let row = tensor(&[3], &[1.5, -0.5, 2.5]);
    for op in ["Add", "Sub", "Mul", "Maximum", "Minimum"].iter() {
        check_gradient(op, &[x.clone(), row.clone()], false, none());
    }
    let positive = tensor(&[3], &[1.5, 0.5, 2.5]);
    check_gradient("RealDiv", &[x.clone(), positive.clone()], false, none());
    check_gradient(
        "Pow",
        &[tensor(&[2], &[1.5, 0.75]), tensor(&[2], &[2.0, 0.5])],
        false,
        none(),
    );
    check_gradient("AddN", &[x.clone(), x.clone(), x], false, none());
}

#[test]
fn unary_gradients() {
    let x = tensor(&[4], &[0.3, 1.2, 2.5, 0.8]);
    let signed = tensor(&[4], &[-1.3, 0.4, 2.1, -0.6]);
    for op in ["Exp", "Log", "Sqrt", "Rsqrt", "Reciprocal", "Square"].iter() {
        check_gradient(op, &[x.clone()], false, none());
    }
    for op in ["Neg", "Abs", "Sin", "Cos", "Sigmoid", "Tanh", "ReLU"].iter() {
        check_gradient(op, &[signed.clone()], false, none());
    }
}

#[test]
fn reduction_and_layout_gradients() {
    let x = tensor(&[2, 3], &[0.5, -1.0, 2.0, 1.5, 0.25, -0.75]);
    check_gradient("ReduceSum", &[x.clone()], false, none().with("axis", 1_i64));
    check_gradient(
        "ReduceMean",
        &[x.clone()],
        false,
        none().with("axis", 0_i64).with("keep_dims", true),
    );
    check_gradient("Transpose", &[x.clone()], false, none());
    check_gradient("Reshape", &[x.clone()], false, none().with("shape", vec![3_i64, -1]));
    check_gradient("ExpandDims", &[x.clone()], false, none().with("axis", 1_i64));
    check_gradient("Flatten", &[x.clone()], false, none());
    check_gradient(
        "BroadcastTo",
        &[tensor(&[3], &[1.0, 2.0, 3.0])],
        false,
        none().with("shape", vec![2_i64, 3]),
    );
    check_gradient(
        "Concat",
        &[x.clone(), tensor(&[1, 3], &[7.0, 8.0, 9.0])],
        true,
        none().with("axis", 0_i64),
    );
    let cond = Tensor::from_vec(vec![2, 3], vec![true, false, true, false, false, true]).unwrap();
    check_gradient(
        "Select",
        &[cond, x.clone(), tensor(&[2, 3], &[9.0, 8.0, 7.0, 6.0, 5.0, 4.0])],
        false,
        none(),
    );
    check_gradient(
        "Cast",
        &[x],
        false,
        none().with("dst_type", DType::F64),
    );
}

#[test]
fn nn_gradients() {
    let a = tensor(&[2, 3], &[0.5, -1.0, 2.0, 1.5, 0.25, -0.75]);
    let b = tensor(&[2, 2], &[1.0, -0.5, 0.25, 2.0]);
    check_gradient(
        "MatMul",
        &[a.clone(), b],
        false,
        none().with("transpose_a", true),
    );
    check_gradient(
        "BiasAdd",
        &[a.clone(), tensor(&[3], &[0.1, 0.2, 0.3])],
        false,
        none(),
    );
    check_gradient("Softmax", &[a.clone()], false, none());
    check_gradient("LogSoftmax", &[a.clone()], false, none().with("axis", 0_i64));
    check_gradient("L2Loss", &[a.clone()], false, none());
    let labels = tensor(&[2, 3], &[0.0, 1.0, 0.0, 0.2, 0.3, 0.5]);
    check_gradient_wrt("SoftmaxCrossEntropyWithLogits", &[a, labels], false, none(), &[0]);
}

#[test]
fn multi_consumer_gradients_add_up() {
    init();
    let mut session = Session::with_config(SessionConfig::default());
    let t = session.feed(tensor(&[2], &[0.5, 2.0])).unwrap();
    let a = session.apply1("Exp", &[t.into()], &none()).unwrap();
    let b = session.apply1("Square", &[t.into()], &none()).unwrap();
    let out = session.apply1("Add", &[a.into(), b.into()], &none()).unwrap();
    session.run().unwrap();
    session.backward(out, None).unwrap();
    let grad = session.grad(t).unwrap().unwrap().read();
    let expected = [0.5_f64.exp() + 1.0, 2.0_f64.exp() + 4.0];
    for (got, want) in grad.iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-12);
    }
}

#[test]
fn repeated_backward_is_identical() {
    let mut session = Session::with_config(SessionConfig::default().with_workers(3));
    let x = session.feed(tensor(&[3], &[0.1, 0.2, 0.3])).unwrap();
    let s = session.apply1("Sin", &[x.into()], &none()).unwrap();
    let c = session.apply1("Cos", &[x.into()], &none()).unwrap();
    let out = session.apply1("Mul", &[s.into(), c.into()], &none()).unwrap();
    session.run().unwrap();
    let upstream = tensor(&[3], &[1.0, -2.0, 0.5]);
    session.backward(out, Some(upstream.clone())).unwrap();
    let first = session.grad(x).unwrap();
    session.backward(out, Some(upstream)).unwrap();
    assert_eq!(first, session.grad(x).unwrap());
}

#[test]
fn reshape_round_trip_restores() {
    let x = tensor(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let back = x.reshape(&[3, 2]).unwrap().reshape(&[2, 3]).unwrap();
    assert_eq!(back, x);
    assert!(matches!(
        x.reshape(&[4, 2]).unwrap_err(),
        OpError::ShapeMismatch { .. }
    ));
}

#[test]
fn forward_only_operators_run_without_gradients() {
    let registry = Registry::global();
    for name in ["FloorDiv", "FloorMod", "Equal", "BitwiseAnd", "Shape", "OnesLike"].iter() {
        assert!(!registry.lookup(name).unwrap().has_gradient(), "{}", name);
    }
    let x = Tensor::from_vec(vec![3], vec![7_i32, -7, 9]).unwrap();
    let y = Tensor::scalar(2_i32);
    let out = registry
        .execute1("FloorDiv", &[x.into(), y.into()], &none())
        .unwrap();
    assert_eq!(out.to_vec::<i32>(), Some(vec![3, -4, 4]));
}

#[test]
fn augmentation_is_validated_when_applied() {
    init();
    let mut session = Session::with_config(SessionConfig::default());
    let image = session.feed(Tensor::zeros(DType::U8, &[32, 32, 3])).unwrap();
    let flips = vec![
        OpSpec::new("RandomHorizontalFlip"),
        OpSpec::new("RandomVerticalFlip"),
    ];
    let cases: Vec<(Attributes, &str)> = vec![
        (none().with("operations", flips.clone()).with("num_ops", 0_i64), "num_ops"),
        (none().with("operations", flips.clone()).with("num_ops", 3_i64), "num_ops"),
        (
            none()
                .with("operations", vec![OpSpec::new("Add")])
                .with("num_ops", 1_i64),
            "operations",
        ),
    ];
    for (attrs, cited) in cases {
        let err = session
            .apply("UniformAugment", &[image.into()], &attrs)
            .unwrap_err();
        assert_eq!(err.attribute(), Some(cited));
    }
    let err = session
        .apply(
            "UniformAugment",
            &[image.into()],
            &none().with("operations", flips).with("num_ops", 2.5),
        )
        .unwrap_err();
    assert!(err.to_string().contains("integer"));

    let err = session
        .apply(
            "RandomCrop",
            &[image.into()],
            &none().with("size", vec![224_i64, 224]),
        )
        .unwrap_err();
    assert!(err.to_string().contains("Crop size"));

    let cropped = session
        .apply1("RandomCrop", &[image.into()], &none().with("size", 28_i64))
        .unwrap();
    session.run().unwrap();
    assert_eq!(session.value(cropped).unwrap().shape(), &[28, 28, 3]);
}

#[test]
fn cast_rejects_non_tensor_input() {
    let err = Registry::global()
        .execute(
            "Cast",
            &[Value::Const(2.5_f64.into())],
            &none().with("dst_type", DType::F32),
        )
        .unwrap_err();
    assert!(matches!(err, OpError::AttributeTypeError { .. }));
}
