use burn::{
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{activation::relu, backend::Backend, Tensor},
};

/// Feed-forward regressor over one feature row
///
/// Architecture: Linear -> ReLU -> Linear -> ReLU -> Linear(1)
#[derive(Module, Debug)]
pub struct MlpNet<B: Backend> {
    input_layer: Linear<B>,
    hidden_layer: Linear<B>,
    output_layer: Linear<B>,
}

/// Configuration for the network
#[derive(burn::config::Config)]
pub struct MlpNetConfig {
    pub input_size: usize,
    pub hidden_size: usize,
}

impl MlpNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MlpNet<B> {
        MlpNet {
            input_layer: LinearConfig::new(self.input_size, self.hidden_size).init(device),
            hidden_layer: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            output_layer: LinearConfig::new(self.hidden_size, 1).init(device),
        }
    }
}

impl<B: Backend> MlpNet<B> {
    /// Input shape: [batch_size, input_size]
    /// Output shape: [batch_size, 1]
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.input_layer.forward(input));
        let x = relu(self.hidden_layer.forward(x));
        self.output_layer.forward(x)
    }
}
