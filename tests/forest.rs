mod test_data;

#[cfg(test)]
mod tests {
    use super::test_data::{setup_classification, setup_regression, split_halves, to_dense};
    use rgf::{
        forest::{fit, ForestGrower, ForestParamsBuilder, GrowthStatus},
        loss::LossKind,
        regularizer::RegularizerKind,
        FittedModel,
    };

    fn mse(pred: &ndarray::Array1<f64>, y: &ndarray::Array1<f64>) -> f64 {
        (pred - y).mapv(|d| d * d).mean().unwrap()
    }

    #[test]
    fn test_forest_beats_mean_on_held_out_data() {
        let (x, y) = setup_regression();
        let ((x_train, y_train), (x_test, y_test)) = split_halves(&x, &y);
        let params = ForestParamsBuilder::new()
            .lambda(0.01)
            .min_leaf_size(5)
            .max_leaves(100)
            .optimize_interval(25)
            .use_average(true)
            .build()
            .unwrap();
        let (fit_result, model) = fit(&x_train, y_train.clone(), params).unwrap();

        let mean = y_test.mean().unwrap();
        let base_err = y_test.mapv(|v| (v - mean).powi(2)).mean().unwrap();
        let test_err = mse(&model.predict(to_dense(&x_test).view()), &y_test);
        println!(
            "Base error: {:?}, Training Error: {:?}, Test Error: {:?}",
            base_err, fit_result.err, test_err
        );
        assert!(test_err < base_err, "Error is not less than mean error");
    }

    #[test]
    fn test_loss_decreases_across_checkpoints() {
        let (x, y) = setup_regression();
        let params = ForestParamsBuilder::new()
            .lambda(0.01)
            .min_leaf_size(5)
            .max_leaves(80)
            .optimize_interval(20)
            .test_interval(20)
            .build()
            .unwrap();
        let mut grower = ForestGrower::cold_start(&x, y, params).unwrap();
        let mut losses = vec![grower.fit_result().err];
        loop {
            match grower.proceed().unwrap() {
                GrowthStatus::Continuing => {}
                GrowthStatus::TestNow => losses.push(grower.fit_result().err),
                GrowthStatus::Done => break,
            }
        }
        losses.push(grower.fit_result().err);
        assert!(losses.len() >= 4);
        assert!(losses.iter().all(|l| l.is_finite()));
        assert!(
            losses[losses.len() - 1] < 0.5 * losses[0],
            "losses barely moved: {losses:?}"
        );
    }

    #[test]
    fn test_training_is_deterministic() {
        let (x, y) = setup_regression();
        let params = ForestParamsBuilder::new()
            .max_leaves(40)
            .regularizer(RegularizerKind::Plain)
            .depth_factor(1.2)
            .build()
            .unwrap();
        let (_, model1) = fit(&x, y.clone(), params.clone()).unwrap();
        let (_, model2) = fit(&x, y, params).unwrap();
        assert_eq!(model1, model2);
    }

    #[test]
    fn test_logistic_forest_separates_classes() {
        let (x, y) = setup_classification();
        let params = ForestParamsBuilder::new()
            .loss(LossKind::Logistic)
            .lambda(0.01)
            .min_leaf_size(5)
            .max_leaves(60)
            .build()
            .unwrap();
        let (fit_result, _) = fit(&x, y.clone(), params).unwrap();
        let correct = fit_result
            .y_hat
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| (**p > 0.0) == (**t > 0.0))
            .count();
        let accuracy = correct as f64 / y.len() as f64;
        assert!(accuracy > 0.8, "accuracy {accuracy}");
        assert!(fit_result.err < std::f64::consts::LN_2);
    }
}
