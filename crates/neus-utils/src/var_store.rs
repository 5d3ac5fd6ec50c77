use log::info;
use tch::nn::VarStore;
use tch::{Device, Kind};

pub trait ListParameters {
    fn log_parameters(&self);
    fn parameter_info(&self) -> Vec<ParameterInfo>;
}

impl ListParameters for VarStore {
    fn log_parameters(&self) {
        let infos = self.parameter_info();
        let total: i64 = infos.iter().map(|i| i.numel).sum();
        info!("{} learned parameter tensors, {} scalars", infos.len(), total);
        for info in infos {
            info!(
                "  {}: shape {:?}, {:?}, {:?}, requires grad: {}",
                info.name, info.shape, info.device, info.kind, info.requires_grad
            );
        }
    }

    fn parameter_info(&self) -> Vec<ParameterInfo> {
        let mut infos: Vec<ParameterInfo> = self
            .variables()
            .into_iter()
            .map(|(name, tensor)| ParameterInfo {
                numel: tensor.size().iter().product(),
                name,
                shape: tensor.size(),
                device: tensor.device(),
                kind: tensor.kind(),
                requires_grad: tensor.requires_grad(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

#[derive(Debug)]
pub struct ParameterInfo {
    pub name: String,
    pub shape: Vec<i64>,
    pub numel: i64,
    pub device: Device,
    pub kind: Kind,
    pub requires_grad: bool,
}
