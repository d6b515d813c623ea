use async_trait::async_trait;
use weft_core::{
    Analyzer, ComponentId, CrawlError, Data, Kind, Module, ModuleBase, ParseResponse, Response,
};

/// Analyzer that runs a fixed list of response parsers in order.
///
/// Requests and items from every parser are concatenated. Invalid data
/// produced by a parser is dropped and reported as an error.
pub struct ParserAnalyzer {
    base: ModuleBase,
    parsers: Vec<ParseResponse>,
}

impl ParserAnalyzer {
    pub fn new(id: ComponentId, parsers: Vec<ParseResponse>) -> Result<Self, CrawlError> {
        if id.kind() != Kind::Analyzer {
            return Err(CrawlError::InvalidParameter(format!(
                "{id} is not an analyzer id"
            )));
        }
        if parsers.is_empty() {
            return Err(CrawlError::InvalidParameter(
                "analyzer needs at least one response parser".into(),
            ));
        }
        Ok(Self {
            base: ModuleBase::new(id, None),
            parsers,
        })
    }
}

impl Module for ParserAnalyzer {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Analyzer for ParserAnalyzer {
    fn resp_parsers(&self) -> &[ParseResponse] {
        &self.parsers
    }

    async fn analyze(&self, resp: &Response) -> (Vec<Data>, Vec<CrawlError>) {
        let _guard = self.base.begin();
        if !resp.is_valid() {
            return (
                Vec::new(),
                vec![CrawlError::InvalidParameter(format!(
                    "response from {} has no body",
                    resp.url
                ))],
            );
        }
        self.base.incr_accepted();

        let mut data = Vec::new();
        let mut errors = Vec::new();
        for (index, parser) in self.parsers.iter().enumerate() {
            let (parsed, parse_errors) = parser(resp);
            for datum in parsed {
                if datum.is_valid() {
                    data.push(datum);
                } else {
                    errors.push(CrawlError::Analyze(format!(
                        "parser #{index} produced invalid data for {}",
                        resp.url
                    )));
                }
            }
            errors.extend(parse_errors);
        }

        tracing::debug!(
            id = %self.base.id(),
            url = %resp.url,
            data = data.len(),
            errors = errors.len(),
            "Analyzed response"
        );
        if errors.is_empty() {
            self.base.incr_completed();
        }
        (data, errors)
    }
}
