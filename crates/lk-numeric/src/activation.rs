/// Logistic sigmoid: 1 / (1 + exp(-x)).
pub fn sigmoid(x: f32) -> f32 {
    lk_tensor::cpu::bias::sigmoid(x)
}

/// Derivative of the sigmoid expressed in terms of its output `s`.
pub fn sigmoid_derivative(s: f32) -> f32 {
    s * (1.0 - s)
}
