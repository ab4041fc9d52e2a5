use std::collections::HashMap;

use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{all_consuming, opt},
    multi::separated_list1,
    sequence::{preceded, separated_pair, terminated},
    IResult,
};

use crate::error::Error;

const QUOTE: char = '"';
const DELIMITER: char = '=';

/// Represents WWW-Authenticate header
/// Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull"
///
/// Attributes are kept as a map: the flow needs `service` and
/// `scope`, unknown keys are preserved but ignored. Values with
/// commas inside the quotes misparse, since the tokenizer
/// treats `=` and `"` as one joint delimiter class.
#[derive(Debug)]
pub struct WwwAuthenticate {
    attributes: HashMap<String, String>,
}

impl WwwAuthenticate {
    #[fehler::throws]
    pub fn parse(input: &str) -> Self {
        all_consuming(preceded(
            terminated(tag("Bearer"), char(' ')),
            separated_list1(char(','), attribute),
        ))(input)
        .map(|(_, attributes)| Self {
            attributes: attributes
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        })
        .map_err(|_| Error::InvalidChallenge(input.into()))?
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

fn attribute(input: &str) -> IResult<&str, (&str, &str)> {
    terminated(separated_pair(key, delimiters, value), opt(char(QUOTE)))(input)
}

fn key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != DELIMITER && c != QUOTE && c != ',')(input)
}

fn delimiters(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c == DELIMITER || c == QUOTE)(input)
}

fn value(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != QUOTE && c != ',')(input)
}
