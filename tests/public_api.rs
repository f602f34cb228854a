use ndarray::{array, s, Array2};
use spanlab::{
    get_entities_with_repairs, merge_window_spans, read_reviews, windows, write_reviews,
    ClassMetrics, Decode, DecodeConfig, DecodeConfigBuilder, DivByZeroStrat, EntitySpan,
    Evaluation, Example, LabelMap, Markup, ModelOutput, PointerDecoder, Prediction, RepairKind,
    ScoreModel, ScoreTensor, SpanDecoder, Strategy, TransitionMatrix,
};
use std::convert::Infallible;
use tracing_subscriber::EnvFilter;

/// Routes the library logs to the test output. Set `RUST_LOG=spanlab=debug` to see them.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub trait CloseEnough {
    fn are_close(&self, other: &Self, eps: f64) -> bool;
}

impl CloseEnough for ClassMetrics {
    fn are_close(&self, other: &Self, eps: f64) -> bool {
        let precision_is_equal = f64::abs(self.precision - other.precision) < eps;
        let recall_is_equal = f64::abs(self.recall - other.recall) < eps;
        let fscore_is_equal = f64::abs(self.f1 - other.f1) < eps;
        self.support == other.support && precision_is_equal && recall_is_equal && fscore_is_equal
    }
}

/// A sequence tagging model which is certain of the tags it is given.
struct OneHotTagger {
    num_tags: usize,
}

impl ScoreModel for OneHotTagger {
    type Input = Vec<usize>;
    type Float = f32;
    type Error = Infallible;

    fn scores(&self, input: &Vec<usize>) -> Result<ModelOutput<f32>, Infallible> {
        let mut scores = Array2::zeros((input.len(), self.num_tags));
        for (i, &id) in input.iter().enumerate() {
            scores[[i, id]] = 1.0;
        }
        Ok(ModelOutput::new(scores, input.len()))
    }
}

fn span(category: &str, start: usize, end: usize) -> EntitySpan {
    EntitySpan::new(category, start, end).unwrap()
}

#[test]
fn evaluation_of_a_bio_tagger() {
    init_logging();
    let labels = LabelMap::new(["O", "B-PER", "I-PER", "B-LOC", "I-LOC", "[CLS]"]).unwrap();
    let config = DecodeConfigBuilder::<DivByZeroStrat>::new()
        .strategy(Strategy::Argmax)
        .markup(Markup::Bio)
        .build()
        .unwrap();
    let model = OneHotTagger { num_tags: 6 };
    let mut evaluation = Evaluation::new(&model, &labels, &config).unwrap();
    evaluation.start().unwrap();
    // [CLS] B-PER I-PER O B-LOC
    let first = Example::new(0usize, vec![5, 1, 2, 0, 3])
        .with_gold(vec![span("PER", 0, 1), span("LOC", 3, 4)]);
    // [CLS] O B-LOC I-LOC
    let second = Example::new(1usize, vec![5, 0, 3, 4]).with_gold(vec![span("LOC", 1, 2)]);
    evaluation.step(&[first]).unwrap();
    evaluation.step(&[second]).unwrap();
    let report = evaluation.end().unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(report.examples, 2);
    assert!(f64::abs(report.overall.precision - 2.0 / 3.0) < 1e-9);
    assert!(f64::abs(report.overall.recall - 2.0 / 3.0) < 1e-9);
    assert!(f64::abs(report.overall.f1 - 2.0 / 3.0) < 1e-9);
    let expected_loc = ClassMetrics {
        precision: 0.5,
        recall: 0.5,
        f1: 0.5,
        support: 2,
        found: 2,
        right: 1,
    };
    assert!(report.classes["LOC"].are_close(&expected_loc, 1e-9));
    assert_eq!(report.classes["PER"].f1, 1.0);
}

#[test]
fn viterbi_repairs_what_argmax_drops() {
    init_logging();
    let labels = LabelMap::new(["O", "B-PER", "I-PER"]).unwrap();
    let config =
        DecodeConfig::from_json(r#"{"strategy": "viterbi", "markup": "bio", "leading_token_offset": 0}"#)
            .unwrap();
    let emissions = array![[1.0f32, 0.0, 0.0], [0.0, 0.6, 1.0], [0.0, 0.0, 1.0]];
    let tensor = ScoreTensor::new(emissions.view(), 3);

    let argmax = SpanDecoder::Argmax(spanlab::ArgmaxDecoder);
    assert!(argmax.decode(&tensor, &labels, &config).unwrap().is_empty());

    let viterbi = SpanDecoder::from_config(&config, &labels).unwrap();
    assert_eq!(
        viterbi.decode(&tensor, &labels, &config).unwrap(),
        vec![span("PER", 1, 2)]
    );
    assert_eq!(
        viterbi.tag_sequence(&tensor, &labels, &config).unwrap(),
        Some(vec![
            String::from("O"),
            String::from("B-PER"),
            String::from("I-PER")
        ])
    );
    let learned = TransitionMatrix::new(Array2::zeros((3, 3)))
        .unwrap()
        .constrained(&labels, &config)
        .unwrap();
    assert_eq!(SpanDecoder::viterbi(learned), viterbi);
}

#[test]
fn windowed_pointer_decoding() {
    init_logging();
    let labels = LabelMap::new(["PER", "LOC"]).unwrap();
    let config = DecodeConfigBuilder::<DivByZeroStrat>::new()
        .leading_token_offset(0)
        .build()
        .unwrap();
    let mut scores = Array2::<f32>::zeros((10, 4));
    scores[[2, 0]] = 0.9;
    scores[[3, 1]] = 0.9;
    scores[[6, 2]] = 0.9;
    scores[[6, 3]] = 0.9;
    let mut per_window = Vec::new();
    for window in windows(10, 4, 1).unwrap() {
        let view = scores.slice(s![window.clone(), ..]);
        let tensor = ScoreTensor::new(view, window.len());
        let spans = PointerDecoder::default()
            .decode(&tensor, &labels, &config)
            .unwrap();
        per_window.push((window, spans));
    }
    assert_eq!(
        merge_window_spans(per_window),
        vec![span("PER", 2, 3), span("LOC", 6, 6)]
    );
}

#[test]
fn autofix_reports_repairs() {
    init_logging();
    let config = DecodeConfigBuilder::<DivByZeroStrat>::new()
        .markup(Markup::Bios)
        .autofix(true)
        .build()
        .unwrap();
    let (spans, repairs) = get_entities_with_repairs(&["I-PER", "E-PER", "B-LOC"], &config);
    assert_eq!(spans, vec![span("PER", 0, 1), span("LOC", 2, 2)]);
    let kinds: Vec<_> = repairs.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![RepairKind::OrphanInside, RepairKind::Unterminated]);
    assert_eq!(
        Markup::detect(&["B-PER", "E-PER", "S-LOC", "O"], false, '-').unwrap(),
        Markup::Bios
    );
}

#[test]
fn predictions_written_as_reviews() {
    init_logging();
    let labels = LabelMap::new(["O", "S-PER", "[CLS]"]).unwrap();
    let config = DecodeConfigBuilder::<DivByZeroStrat>::new()
        .strategy(Strategy::Argmax)
        .parallel(true)
        .build()
        .unwrap();
    let model = OneHotTagger { num_tags: 3 };
    let mut prediction = Prediction::new(&model, &labels, &config).unwrap();
    prediction.start().unwrap();
    let batch: Vec<_> = (0..8usize)
        .map(|i| Example::new(format!("doc-{}", i), vec![2, 0, 1, 0]))
        .collect();
    prediction.step(&batch).unwrap();
    let records = prediction.end().unwrap();
    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|r| r.entities == vec![span("PER", 1, 1)]));

    let path = std::env::temp_dir().join(format!("spanlab-public-api-{}.jsonl", std::process::id()));
    write_reviews(&path, &records).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        content.lines().next(),
        Some(r#"{"id":"doc-0","entities":[["PER",1,1]]}"#)
    );
    let read = read_reviews(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(read, records);
}
