//! Parser for the port binding syntax used in node configurations.
//!
//! ```raw
//! {target}     blackboard entry "target"
//! {@target}    entry "target" of the root blackboard
//! {=}          entry named after the port itself
//! 3.5          anything else is a literal
//! ```

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, space0},
    combinator::{all_consuming, map, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::{PortBinding, Symbol};

#[derive(Debug, Clone, PartialEq)]
enum Reference<'src> {
    SameName,
    Local(&'src str),
    Global(&'src str),
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_"), tag("."), tag("/"), tag("-")))),
    ))(input)
}

fn reference(i: &str) -> IResult<&str, Reference<'_>> {
    delimited(
        pair(char('{'), space0),
        alt((
            value(Reference::SameName, char('=')),
            map(preceded(char('@'), identifier), Reference::Global),
            map(identifier, Reference::Local),
        )),
        pair(space0, char('}')),
    )(i)
}

pub(crate) fn parse_port_binding(port: Symbol, text: &str) -> PortBinding {
    match all_consuming(delimited(space0, reference, space0))(text) {
        Ok((_, Reference::SameName)) => PortBinding::Ref(port),
        Ok((_, Reference::Local(key))) => PortBinding::Ref(key.into()),
        Ok((_, Reference::Global(key))) => PortBinding::Global(key.into()),
        Err(_) => PortBinding::Literal(text.to_owned()),
    }
}
