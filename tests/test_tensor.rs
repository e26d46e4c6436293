use ne_light::tensor::*;

#[test]
fn test_from_vec() {
    let tensor1 = RcTensor::from(vec![vec![0, 1, 2], vec![3, 4, 5]]);
    let tensor2 = RcTensor::new((0..6).collect(), vec![2, 3]);
    assert_eq!(tensor1, tensor2);
}

#[test]
fn test_new_with_filler() {
    let vec = RcTensor::new_with_filler(vec![4], 4);
    assert_eq!(vec.shape(), &[4]);
    assert_eq!(vec.get(&[0]).unwrap(), &4);
}

#[test]
fn test_get_2x2x2() {
    let matrix = RcTensor::new(vec![0, 1, 2, 3, 4, 5, 6, 7], vec![2, 2, 2]);
    assert_eq!(*matrix.get(&[0, 0, 0]).unwrap(), 0);
    assert_eq!(*matrix.get(&[0, 1, 0]).unwrap(), 2);
    assert_eq!(*matrix.get(&[1, 1, 1]).unwrap(), 7);
}

#[test]
fn test_get_3x3x4() {
    let matrix = RcTensor::new((0..(3 * 3 * 4)).collect(), vec![3, 3, 4]);
    assert_eq!(*matrix.get(&[0, 0, 0]).unwrap(), 0);
    assert_eq!(*matrix.get(&[2, 2, 3]).unwrap(), 3 * 3 * 4 - 1);
}

#[test]
fn test_get_3x3() {
    let matrix = RcTensor::new(vec![0, 1, 2, 3, 4, 5, 6, 7, 8], vec![3, 3]);
    let mut prev = -1;
    for i in 0..3 {
        for j in 0..3 {
            let &curr = matrix.get(&[i, j]).unwrap();
            assert_eq!(prev + 1, curr);
            prev = curr;
        }
    }
    assert_eq!(matrix.get(&[1, 0]).unwrap(), &3);
    assert_eq!(matrix.get(&[2, 2]).unwrap(), &8);
    assert!(matrix.get(&[3, 0]).is_err());
}

#[test]
fn test_add_scalar() {
    let tensor1 = RcTensor::new((0..32).collect(), vec![2, 4, 4]);
    let tensor2 = RcTensor::new((42..(32 + 42)).collect(), vec![2, 4, 4]);
    let scalar = RcTensor::scalar(42);
    assert_eq!(&tensor1 + &scalar, tensor2);
    assert_eq!(&scalar + &tensor1, tensor2);
}

#[test]
fn test_add_broadcast() {
    let tensor1 = RcTensor::new_with_filler(vec![4, 4], 1);
    let tensor2 = RcTensor::new((0..32).collect(), vec![2, 4, 4]);
    let tensor3 = RcTensor::new((1..33).collect(), vec![2, 4, 4]);
    assert_eq!(&tensor2 + &tensor1, tensor3);
    assert_eq!(&tensor1 + &tensor2, tensor3);
}

#[test]
fn test_matmul_2x2() {
    let matrix = RcTensor::new(vec![0, 1, 2, 3], vec![2, 2]);
    let shape = vec![2, 1];
    let diag = RcTensor::new(vec![1, 1], vec![2, 1]);

    let r = matrix.matmul(&diag);
    assert_eq!(r.shape(), &shape[..]);
    assert_eq!(r, RcTensor::new(vec![1, 5], shape));
}

#[test]
fn test_left_scalar_multiplication() {
    let vec = RcTensor::new_with_filler(vec![4], 1);
    assert_eq!(
        vec.left_scalar_multiplication(&42),
        RcTensor::new(vec![42, 42, 42, 42], vec![4])
    );
}

#[test]
fn test_batch_regression_gradients() {
    // loss = mean((x w + b - y)^2) over a batch of two rows
    let x = RcTensor::from([[1.0, 2.0], [3.0, 4.0]]);
    let w = RcTensor::from([[0.5], [-0.5]]);
    let b = RcTensor::from([[1.0]]);
    let y = RcTensor::from([[0.0], [1.0]]);
    let prediction = &x.matmul(&w) + &b;
    assert_eq!(prediction, RcTensor::from([[0.5], [0.5]]));

    let loss = functional::mse_loss(&prediction, &y);
    assert_eq!(loss.elem(), 0.25);
    loss.backward();

    // residuals r = [0.5, -0.5]; dL/dp = r
    assert_eq!(b.grad(), RcTensor::from([[0.0]]));
    assert_eq!(w.grad(), RcTensor::from([[-1.0], [-1.0]]));
    assert!(!y.has_grad() || y.grad() == RcTensor::from([[-0.5], [0.5]]));
}
